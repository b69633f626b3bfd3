// JSON value model handed to the jq interpreter; integers stay integers across stages.
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use jaq_core::ops::Math;
use jaq_core::path::Opt;
use jaq_core::val::Range;
use jaq_core::{Error as JaqError, ValX};
use serde_json::{Map, Number, Value};

type ValR = Result<JqValue, JaqError<JqValue>>;

#[derive(Clone, Debug)]
pub enum JqValue {
    Null,
    Bool(bool),
    Int(isize),
    Float(f64),
    Str(String),
    Arr(Vec<JqValue>),
    Obj(BTreeMap<String, JqValue>),
}

impl JqValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64().and_then(|i| isize::try_from(i).ok()) {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => Self::Str(s.clone()),
            Value::Array(items) => Self::Arr(items.iter().map(Self::from_json).collect()),
            Value::Object(obj) => Self::Obj(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(b),
            Self::Int(i) => Value::from(i as i64),
            Self::Float(f) => float_json(f),
            Self::Str(s) => Value::String(s),
            Self::Arr(items) => Value::Array(items.into_iter().map(Self::into_json).collect()),
            Self::Obj(obj) => {
                let mut map = Map::new();
                for (k, v) in obj {
                    map.insert(k, v.into_json());
                }
                Value::Object(map)
            }
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(false) => 1,
            Self::Bool(true) => 2,
            Self::Int(_) | Self::Float(_) => 3,
            Self::Str(_) => 4,
            Self::Arr(_) => 5,
            Self::Obj(_) => 6,
        }
    }

    fn number(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn integer(&self) -> Option<isize> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as isize),
            _ => None,
        }
    }

    fn text(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    fn arith(
        self,
        rhs: Self,
        op: Math,
        int: fn(isize, isize) -> Option<isize>,
        float: fn(f64, f64) -> f64,
    ) -> ValR {
        match (self, rhs) {
            (Self::Int(a), Self::Int(b)) => Ok(int(a, b)
                .map(Self::Int)
                .unwrap_or_else(|| Self::Float(float(a as f64, b as f64)))),
            (l, r) => match (l.number(), r.number()) {
                (Some(a), Some(b)) => Ok(Self::Float(float(a, b))),
                _ => Err(JaqError::math(l, op, r)),
            },
        }
    }
}

fn float_json(f: f64) -> Value {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        return Value::from(f as i64);
    }
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

fn slice_bounds(len: usize, range: &Range<&JqValue>) -> Result<(usize, usize), JaqError<JqValue>> {
    let len = len as isize;
    let bound = |v: Option<&&JqValue>, default: isize| -> Result<usize, JaqError<JqValue>> {
        let idx = match v {
            Some(v) => v
                .integer()
                .ok_or_else(|| JaqError::typ((*v).clone(), "integer"))?,
            None => default,
        };
        let idx = if idx < 0 { len + idx } else { idx };
        Ok(idx.clamp(0, len) as usize)
    };
    let start = bound(range.start.as_ref(), 0)?;
    let end = bound(range.end.as_ref(), len)?;
    Ok((start, end.max(start)))
}

fn first_or_null<'a, I: Iterator<Item = ValX<'a, JqValue>>>(mut iter: I) -> ValX<'a, JqValue> {
    iter.next().unwrap_or(Ok(JqValue::Null))
}

impl fmt::Display for JqValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.clone().into_json())
    }
}

impl From<bool> for JqValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<isize> for JqValue {
    fn from(value: isize) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for JqValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for JqValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl FromIterator<Self> for JqValue {
    fn from_iter<T: IntoIterator<Item = Self>>(iter: T) -> Self {
        Self::Arr(iter.into_iter().collect())
    }
}

impl PartialEq for JqValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for JqValue {}

impl PartialOrd for JqValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JqValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Arr(a), Self::Arr(b)) => a.cmp(b),
            (Self::Obj(a), Self::Obj(b)) => a.cmp(b),
            (l, r) => match (l.number(), r.number()) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                _ => l.rank().cmp(&r.rank()),
            },
        }
    }
}

impl std::ops::Add for JqValue {
    type Output = ValR;

    fn add(self, rhs: Self) -> ValR {
        match (self, rhs) {
            (Self::Null, other) | (other, Self::Null) => Ok(other),
            (Self::Str(a), Self::Str(b)) => Ok(Self::Str(a + &b)),
            (Self::Arr(mut a), Self::Arr(b)) => {
                a.extend(b);
                Ok(Self::Arr(a))
            }
            (Self::Obj(mut a), Self::Obj(b)) => {
                a.extend(b);
                Ok(Self::Obj(a))
            }
            (l, r) => l.arith(r, Math::Add, isize::checked_add, |a, b| a + b),
        }
    }
}

impl std::ops::Sub for JqValue {
    type Output = ValR;

    fn sub(self, rhs: Self) -> ValR {
        match (self, rhs) {
            (Self::Arr(a), Self::Arr(b)) => {
                Ok(Self::Arr(a.into_iter().filter(|v| !b.contains(v)).collect()))
            }
            (l, r) => l.arith(r, Math::Sub, isize::checked_sub, |a, b| a - b),
        }
    }
}

impl std::ops::Mul for JqValue {
    type Output = ValR;

    fn mul(self, rhs: Self) -> ValR {
        self.arith(rhs, Math::Mul, isize::checked_mul, |a, b| a * b)
    }
}

impl std::ops::Div for JqValue {
    type Output = ValR;

    fn div(self, rhs: Self) -> ValR {
        if rhs.number() == Some(0.0) {
            return Err(JaqError::math(self, Math::Div, rhs));
        }
        let exact = |a: isize, b: isize| {
            a.checked_rem(b)
                .filter(|rem| *rem == 0)
                .and_then(|_| a.checked_div(b))
        };
        self.arith(rhs, Math::Div, exact, |a, b| a / b)
    }
}

impl std::ops::Rem for JqValue {
    type Output = ValR;

    fn rem(self, rhs: Self) -> ValR {
        if rhs.integer() == Some(0) {
            return Err(JaqError::math(self, Math::Rem, rhs));
        }
        self.arith(rhs, Math::Rem, isize::checked_rem, |a, b| a % b)
    }
}

impl std::ops::Neg for JqValue {
    type Output = ValR;

    fn neg(self) -> ValR {
        match self {
            Self::Int(i) => Ok(i
                .checked_neg()
                .map_or_else(|| Self::Float(-(i as f64)), Self::Int)),
            Self::Float(f) => Ok(Self::Float(-f)),
            other => Err(JaqError::typ(other, "number")),
        }
    }
}

impl jaq_core::ValT for JqValue {
    fn from_num(n: &str) -> ValR {
        if let Ok(i) = n.parse::<isize>() {
            return Ok(Self::Int(i));
        }
        n.parse::<f64>().map(Self::Float).map_err(JaqError::str)
    }

    fn from_map<I: IntoIterator<Item = (Self, Self)>>(iter: I) -> ValR {
        let mut map = BTreeMap::new();
        for (k, v) in iter {
            match k {
                Self::Str(key) => {
                    map.insert(key, v);
                }
                other => return Err(JaqError::typ(other, "string")),
            }
        }
        Ok(Self::Obj(map))
    }

    fn values(self) -> Box<dyn Iterator<Item = ValR>> {
        match self {
            Self::Arr(items) => Box::new(items.into_iter().map(Ok)),
            Self::Obj(obj) => Box::new(obj.into_values().map(Ok)),
            other => Box::new(std::iter::once(Err(JaqError::typ(other, "iterable")))),
        }
    }

    fn index(self, index: &Self) -> ValR {
        match (self, index) {
            (Self::Null, _) => Ok(Self::Null),
            (Self::Obj(mut obj), Self::Str(key)) => Ok(obj.remove(key).unwrap_or(Self::Null)),
            (Self::Arr(items), idx) => {
                let Some(i) = idx.integer() else {
                    return Err(JaqError::index(Self::Arr(items), idx.clone()));
                };
                let i = if i < 0 { items.len() as isize + i } else { i };
                Ok(usize::try_from(i)
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or(Self::Null))
            }
            (l, r) => Err(JaqError::index(l, r.clone())),
        }
    }

    fn range(self, range: Range<&Self>) -> ValR {
        match self {
            Self::Null => Ok(Self::Null),
            Self::Arr(items) => {
                let (start, end) = slice_bounds(items.len(), &range)?;
                Ok(Self::Arr(items[start..end].to_vec()))
            }
            Self::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let (start, end) = slice_bounds(chars.len(), &range)?;
                Ok(Self::Str(chars[start..end].iter().collect()))
            }
            other => Err(JaqError::typ(other, "array")),
        }
    }

    fn map_values<'a, I: Iterator<Item = ValX<'a, Self>>>(
        self,
        opt: Opt,
        f: impl Fn(Self) -> I,
    ) -> ValX<'a, Self> {
        match self {
            Self::Arr(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(next) = f(item).next() {
                        out.push(next?);
                    }
                }
                Ok(Self::Arr(out))
            }
            Self::Obj(obj) => {
                let mut out = BTreeMap::new();
                for (k, v) in obj {
                    if let Some(next) = f(v).next() {
                        out.insert(k, next?);
                    }
                }
                Ok(Self::Obj(out))
            }
            other => match opt {
                Opt::Optional => Ok(other),
                Opt::Essential => Err(JaqError::typ(other, "iterable").into()),
            },
        }
    }

    fn map_index<'a, I: Iterator<Item = ValX<'a, Self>>>(
        self,
        index: &Self,
        opt: Opt,
        f: impl Fn(Self) -> I,
    ) -> ValX<'a, Self> {
        match (self, index) {
            (Self::Obj(mut obj), Self::Str(key)) => {
                let current = obj.remove(key).unwrap_or(Self::Null);
                obj.insert(key.clone(), first_or_null(f(current))?);
                Ok(Self::Obj(obj))
            }
            (Self::Null, Self::Str(key)) => {
                let mut obj = BTreeMap::new();
                obj.insert(key.clone(), first_or_null(f(Self::Null))?);
                Ok(Self::Obj(obj))
            }
            (Self::Arr(mut items), idx) if idx.integer().is_some() => {
                let raw = idx.integer().unwrap_or(0);
                let i = if raw < 0 { items.len() as isize + raw } else { raw };
                let Ok(i) = usize::try_from(i) else {
                    return Err(JaqError::index(Self::Arr(items), idx.clone()).into());
                };
                if i >= items.len() {
                    items.resize(i + 1, Self::Null);
                }
                let current = std::mem::replace(&mut items[i], Self::Null);
                items[i] = first_or_null(f(current))?;
                Ok(Self::Arr(items))
            }
            (other, idx) => match opt {
                Opt::Optional => Ok(other),
                Opt::Essential => Err(JaqError::index(other, idx.clone()).into()),
            },
        }
    }

    fn map_range<'a, I: Iterator<Item = ValX<'a, Self>>>(
        self,
        range: Range<&Self>,
        opt: Opt,
        f: impl Fn(Self) -> I,
    ) -> ValX<'a, Self> {
        match self {
            Self::Arr(mut items) => {
                let (start, end) = slice_bounds(items.len(), &range)?;
                let slice = Self::Arr(items[start..end].to_vec());
                match first_or_null(f(slice))? {
                    Self::Arr(replacement) => {
                        items.splice(start..end, replacement);
                        Ok(Self::Arr(items))
                    }
                    other => Err(JaqError::typ(other, "array").into()),
                }
            }
            other => match opt {
                Opt::Optional => Ok(other),
                Opt::Essential => Err(JaqError::typ(other, "array").into()),
            },
        }
    }

    fn as_bool(&self) -> bool {
        !matches!(self, Self::Null | Self::Bool(false))
    }

    fn as_str(&self) -> Option<&str> {
        self.text()
    }
}

impl jaq_std::ValT for JqValue {
    fn into_seq<S: FromIterator<Self>>(self) -> Result<S, Self> {
        match self {
            Self::Arr(items) => Ok(items.into_iter().collect()),
            other => Err(other),
        }
    }

    fn as_isize(&self) -> Option<isize> {
        self.integer()
    }

    fn as_f64(&self) -> Result<f64, JaqError<Self>> {
        self.number()
            .ok_or_else(|| JaqError::typ(self.clone(), "number"))
    }
}

#[cfg(test)]
mod tests {
    use super::JqValue;
    use serde_json::json;

    #[test]
    fn integers_survive_arithmetic() {
        let a = JqValue::from_json(&json!(3));
        let b = JqValue::from_json(&json!(2));
        let product = (a * b).expect("mul");
        assert_eq!(product.clone().into_json(), json!(6));
        let sum = (product + JqValue::Int(1)).expect("add");
        assert_eq!(sum.into_json(), json!(7));
        let half = (JqValue::Int(7) / JqValue::Int(2)).expect("div");
        assert_eq!(half.into_json(), json!(3.5));
    }

    #[test]
    fn numbers_compare_across_representations() {
        assert_eq!(JqValue::Int(2), JqValue::Float(2.0));
        assert!(JqValue::Null < JqValue::Bool(false));
        assert!(JqValue::Int(10) < JqValue::Str("a".into()));
    }

    #[test]
    fn json_round_trip_keeps_shape() {
        let value = json!({"a": [1, 2.5, null, "x"], "b": {"c": true}});
        assert_eq!(JqValue::from_json(&value).into_json(), value);
    }
}
