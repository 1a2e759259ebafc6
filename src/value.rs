//! Tagged value model shared between the engine and the host.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::{Rc, Weak};

use chrono::{Datelike, NaiveDateTime};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::error::FaultKind;
use crate::frame::FrameRef;

/// Shared mutable array payload.
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;
/// Shared mutable hash payload; iteration order is insertion order.
pub type HashRef = Rc<RefCell<IndexMap<String, Value>>>;
/// Shared iterator state, advanced in place by the iteration natives.
pub type IterRef = Rc<RefCell<ValueIter>>;

const MAX_DISPLAY_DEPTH: usize = 4;
const MAX_CONVERT_DEPTH: usize = 32;

/// A single datum manipulated by the machine.
///
/// Scalars are owned; aggregates are shared handles mutated in place, which
/// makes reference identity observable in comparisons.
#[derive(Clone)]
pub enum Value {
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    Date(NaiveDateTime),
    Array(ArrayRef),
    Hash(HashRef),
    Iterator(IterRef),
    Function(Rc<FunctionRef>),
}

/// Outcome of ordering two values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Less,
    Equal,
    Greater,
    /// The pair has no defined ordering; every predicate except `ne`
    /// treats this as a non-match.
    Undefined,
}

impl From<Ordering> for Comparison {
    fn from(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => Self::Less,
            Ordering::Equal => Self::Equal,
            Ordering::Greater => Self::Greater,
        }
    }
}

impl Value {
    /// Wrap a vector of items into a shared array value.
    pub fn array(items: Vec<Value>) -> Self {
        Self::Array(Rc::new(RefCell::new(items)))
    }

    /// Wrap key/value entries into a shared hash value, preserving order.
    pub fn hash<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Self::Hash(Rc::new(RefCell::new(entries.into_iter().collect())))
    }

    /// Variant name used in diagnostics and `Type`.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::Boolean(_) => "boolean",
            Self::Date(_) => "date",
            Self::Array(_) => "array",
            Self::Hash(_) => "hash",
            Self::Iterator(_) => "iterator",
            Self::Function(_) => "function",
        }
    }

    /// Truthiness coercion used by the logic opcodes.
    pub fn as_boolean(&self) -> bool {
        match self {
            Self::Empty => false,
            Self::Number(n) => *n > 0.0,
            Self::Text(s) => !s.is_empty(),
            Self::Boolean(b) => *b,
            Self::Date(d) => d.year() > 1 || d.month() > 1 || d.day() > 1,
            Self::Array(items) => !items.borrow().is_empty(),
            Self::Hash(entries) => !entries.borrow().is_empty(),
            Self::Iterator(iter) => iter.borrow().has_next(),
            Self::Function(_) => true,
        }
    }

    /// Order `self` against `other`.
    ///
    /// Scalars of the same variant use their natural ordering; aggregates
    /// compare by reference identity. `Empty` orders against nothing but
    /// itself. Values of different variants compare as `Equal`, a legacy
    /// behavior preserved on purpose.
    pub fn compare(&self, other: &Value) -> Comparison {
        match (self, other) {
            (Self::Empty, Self::Empty) => Comparison::Equal,
            (Self::Empty, _) | (_, Self::Empty) => Comparison::Undefined,
            (Self::Number(a), Self::Number(b)) => a
                .partial_cmp(b)
                .map(Comparison::from)
                .unwrap_or(Comparison::Undefined),
            (Self::Text(a), Self::Text(b)) => a.cmp(b).into(),
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b).into(),
            (Self::Date(a), Self::Date(b)) => a.cmp(b).into(),
            (Self::Array(a), Self::Array(b)) => identity(Rc::ptr_eq(a, b)),
            (Self::Hash(a), Self::Hash(b)) => identity(Rc::ptr_eq(a, b)),
            (Self::Iterator(a), Self::Iterator(b)) => identity(Rc::ptr_eq(a, b)),
            (Self::Function(a), Self::Function(b)) => identity(a.address() == b.address()),
            _ => Comparison::Equal,
        }
    }

    /// Convert to the host-side JSON representation.
    ///
    /// Integral numbers become JSON integers, dates become ISO-8601 text,
    /// function references surface as their address. Iterators have no
    /// host representation and fail.
    pub fn to_json(&self) -> Result<JsonValue, FaultKind> {
        self.to_json_depth(0)
    }

    fn to_json_depth(&self, depth: usize) -> Result<JsonValue, FaultKind> {
        if depth > MAX_CONVERT_DEPTH {
            return Err(FaultKind::NestingTooDeep);
        }

        match self {
            Self::Empty => Ok(JsonValue::Null),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < i64::MAX as f64 {
                    Ok(JsonValue::from(*n as i64))
                } else {
                    Ok(JsonValue::from(*n))
                }
            }
            Self::Text(s) => Ok(JsonValue::from(s.as_str())),
            Self::Boolean(b) => Ok(JsonValue::from(*b)),
            Self::Date(d) => Ok(JsonValue::from(d.format("%Y-%m-%dT%H:%M:%S").to_string())),
            Self::Array(items) => items
                .borrow()
                .iter()
                .map(|item| item.to_json_depth(depth + 1))
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array),
            Self::Hash(entries) => {
                let mut object = serde_json::Map::new();

                for (key, value) in entries.borrow().iter() {
                    object.insert(key.clone(), value.to_json_depth(depth + 1)?);
                }

                Ok(JsonValue::Object(object))
            }
            Self::Iterator(_) => Err(FaultKind::Unconvertible("iterator")),
            Self::Function(fref) => Ok(JsonValue::from(fref.address())),
        }
    }

    fn fmt_depth(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Number(n) => write_number(f, *n),
            Self::Text(s) => f.write_str(s),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d %H:%M:%S")),
            Self::Array(items) => {
                if depth >= MAX_DISPLAY_DEPTH {
                    return f.write_str("[..]");
                }

                f.write_str("[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt_depth(f, depth + 1)?;
                }
                f.write_str("]")
            }
            Self::Hash(entries) => {
                if depth >= MAX_DISPLAY_DEPTH {
                    return f.write_str("{..}");
                }

                f.write_str("{")?;
                for (i, (key, value)) in entries.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: ")?;
                    value.fmt_depth(f, depth + 1)?;
                }
                f.write_str("}")
            }
            Self::Iterator(_) => f.write_str("<iterator>"),
            Self::Function(fref) => write!(f, "<function @{}>", fref.address()),
        }
    }
}

const fn identity(same: bool) -> Comparison {
    if same {
        Comparison::Equal
    } else {
        Comparison::Undefined
    }
}

/// Canonical textual form of a number: integral values print without a
/// fractional part.
pub(crate) fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{n}")
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) => true,
            // Bitwise equality keeps the relation total (NaN == NaN).
            (Self::Number(a), Self::Number(b)) => a.to_bits() == b.to_bits(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Hash(a), Self::Hash(b)) => Rc::ptr_eq(a, b),
            (Self::Iterator(a), Self::Iterator(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => a.address() == b.address(),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_depth(f, 0)
    }
}

// Shallow by hand: aggregates can reference themselves, so a derived
// implementation could recurse without bound.
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::Text(s) => write!(f, "Text({s:?})"),
            Self::Boolean(b) => write!(f, "Boolean({b})"),
            Self::Date(d) => write!(f, "Date({d})"),
            Self::Array(items) => write!(f, "Array(len {})", items.borrow().len()),
            Self::Hash(entries) => write!(f, "Hash(len {})", entries.borrow().len()),
            Self::Iterator(_) => f.write_str("Iterator"),
            Self::Function(fref) => write!(f, "Function(@{})", fref.address()),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Empty
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(n.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(d: NaiveDateTime) -> Self {
        Self::Date(d)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::array(items)
    }
}

impl From<&JsonValue> for Value {
    fn from(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Empty,
            JsonValue::Bool(b) => Self::Boolean(*b),
            JsonValue::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Self::Text(s.clone()),
            JsonValue::Array(items) => Self::array(items.iter().map(Value::from).collect()),
            JsonValue::Object(entries) => Self::hash(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::from(value))),
            ),
        }
    }
}

/// Reference to a user-defined function: its resolved address, an optional
/// bound receiver and an optional captured closure frame.
pub struct FunctionRef {
    address: i32,
    receiver: Receiver,
    closure: Option<FrameRef>,
}

/// Bound receiver of a method-style reference.
///
/// The handle is weak by construction: the hash owns its values, including
/// the reference bound to it, so the back edge must not own the hash.
#[derive(Clone, Default)]
pub enum Receiver {
    #[default]
    None,
    Hash(Weak<RefCell<IndexMap<String, Value>>>),
}

impl FunctionRef {
    /// An unbound reference with no captured closure.
    pub const fn new(address: i32) -> Self {
        Self {
            address,
            receiver: Receiver::None,
            closure: None,
        }
    }

    /// A reference bound to `receiver` for method-style invocation.
    pub fn bound(address: i32, receiver: &HashRef) -> Self {
        Self {
            address,
            receiver: Receiver::Hash(Rc::downgrade(receiver)),
            closure: None,
        }
    }

    /// A reference capturing the frame it was created in.
    pub fn with_closure(address: i32, closure: FrameRef) -> Self {
        Self {
            address,
            receiver: Receiver::None,
            closure: Some(closure),
        }
    }

    pub const fn address(&self) -> i32 {
        self.address
    }

    /// The bound receiver as a value, if any. A receiver whose hash has
    /// been dropped degrades to `Empty`.
    pub fn receiver_value(&self) -> Option<Value> {
        match &self.receiver {
            Receiver::None => None,
            Receiver::Hash(weak) => Some(
                weak.upgrade()
                    .map(Value::Hash)
                    .unwrap_or(Value::Empty),
            ),
        }
    }

    /// The captured closure frame, if any.
    pub fn closure_frame(&self) -> Option<FrameRef> {
        self.closure.clone()
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionRef(@{})", self.address)
    }
}

/// Iteration state over a target value.
///
/// Hash keys are snapshotted at construction; arrays are indexed live;
/// any other target yields itself exactly once.
#[derive(Debug)]
pub struct ValueIter {
    target: Value,
    keys: Vec<String>,
    index: usize,
    count: usize,
}

impl ValueIter {
    pub fn new(target: Value) -> Self {
        let (keys, count) = match &target {
            Value::Array(items) => (Vec::new(), items.borrow().len()),
            Value::Hash(entries) => {
                let keys: Vec<String> = entries.borrow().keys().cloned().collect();
                let count = keys.len();
                (keys, count)
            }
            _ => (Vec::new(), 1),
        };

        Self {
            target,
            keys,
            index: 0,
            count,
        }
    }

    pub fn has_next(&self) -> bool {
        self.index < self.count
    }

    /// Advance and yield the next element; `Empty` once exhausted.
    pub fn next_value(&mut self) -> Value {
        if !self.has_next() {
            return Value::Empty;
        }

        let value = match &self.target {
            Value::Array(items) => items
                .borrow()
                .get(self.index)
                .cloned()
                .unwrap_or(Value::Empty),
            Value::Hash(_) => Value::Text(self.keys[self.index].clone()),
            other => other.clone(),
        };

        self.index += 1;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn scalar_comparisons_use_natural_ordering() {
        assert_eq!(
            Value::from(1.0).compare(&Value::from(2.0)),
            Comparison::Less
        );
        assert_eq!(
            Value::from("b").compare(&Value::from("a")),
            Comparison::Greater
        );
        assert_eq!(
            Value::from(false).compare(&Value::from(true)),
            Comparison::Less
        );
        assert_eq!(
            Value::from(date(2020, 1, 1)).compare(&Value::from(date(2021, 1, 1))),
            Comparison::Less
        );
    }

    #[test]
    fn empty_orders_against_nothing_but_itself() {
        assert_eq!(Value::Empty.compare(&Value::Empty), Comparison::Equal);
        assert_eq!(
            Value::Empty.compare(&Value::from(0.0)),
            Comparison::Undefined
        );
        assert_eq!(
            Value::from("").compare(&Value::Empty),
            Comparison::Undefined
        );
    }

    #[test]
    fn aggregates_compare_by_identity() {
        let a = Value::array(vec![Value::from(1.0)]);
        let b = a.clone();
        let c = Value::array(vec![Value::from(1.0)]);

        assert_eq!(a.compare(&b), Comparison::Equal);
        assert_eq!(a.compare(&c), Comparison::Undefined);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    // Legacy behavior carried over from the source language: values of
    // different variants compare as equal.
    #[test]
    fn cross_variant_comparison_is_equal() {
        assert_eq!(
            Value::from(1.0).compare(&Value::from("x")),
            Comparison::Equal
        );
        assert_eq!(
            Value::from(true).compare(&Value::from(0.0)),
            Comparison::Equal
        );
    }

    #[test]
    fn truthiness_table() {
        assert!(!Value::Empty.as_boolean());
        assert!(!Value::from(0.0).as_boolean());
        assert!(Value::from(0.5).as_boolean());
        assert!(!Value::from(-1.0).as_boolean());
        assert!(!Value::from("").as_boolean());
        assert!(Value::from("x").as_boolean());
        assert!(!Value::from(date(1, 1, 1)).as_boolean());
        assert!(Value::from(date(1, 1, 2)).as_boolean());
        assert!(!Value::array(vec![]).as_boolean());
        assert!(Value::array(vec![Value::Empty]).as_boolean());
    }

    #[test]
    fn display_is_host_facing() {
        assert_eq!(Value::from(7.0).to_string(), "7");
        assert_eq!(Value::from(2.5).to_string(), "2.5");
        assert_eq!(Value::from("hi").to_string(), "hi");
        assert_eq!(Value::Empty.to_string(), "");
        assert_eq!(
            Value::array(vec![Value::from(1.0), Value::from("a")]).to_string(),
            "[1, a]"
        );
    }

    #[test]
    fn self_referential_display_terminates() {
        let array = Rc::new(RefCell::new(vec![Value::from(1.0)]));
        let value = Value::Array(Rc::clone(&array));
        array.borrow_mut().push(value.clone());

        // Must not recurse without bound.
        let rendered = value.to_string();
        assert!(rendered.contains("[.."));
    }

    #[test]
    fn json_round_trip() {
        let json: JsonValue = serde_json::from_str(
            r#"{"name": "world", "count": 3, "flags": [true, null], "nested": {"x": 1.5}}"#,
        )
        .unwrap();

        let value = Value::from(&json);
        assert_eq!(value.kind_name(), "hash");
        assert_eq!(value.to_json().unwrap(), json);
    }

    #[test]
    fn iterator_over_json_fails() {
        let iter = Value::Iterator(Rc::new(RefCell::new(ValueIter::new(Value::Empty))));
        assert!(iter.to_json().is_err());
    }

    #[test]
    fn hash_iteration_snapshots_keys() {
        let hash = Rc::new(RefCell::new(IndexMap::new()));
        hash.borrow_mut().insert("a".to_string(), Value::from(1.0));
        hash.borrow_mut().insert("b".to_string(), Value::from(2.0));

        let mut iter = ValueIter::new(Value::Hash(Rc::clone(&hash)));
        hash.borrow_mut().insert("c".to_string(), Value::from(3.0));

        assert_eq!(iter.next_value(), Value::from("a"));
        assert_eq!(iter.next_value(), Value::from("b"));
        assert!(!iter.has_next());
    }

    #[test]
    fn scalar_iteration_yields_target_once() {
        let mut iter = ValueIter::new(Value::from(42.0));
        assert!(iter.has_next());
        assert_eq!(iter.next_value(), Value::from(42.0));
        assert!(!iter.has_next());
        assert_eq!(iter.next_value(), Value::Empty);
    }

    #[test]
    fn default_is_empty() {
        assert_eq!(Value::default(), Value::Empty);
    }

    #[test]
    fn dead_receiver_degrades_to_empty() {
        let fref = {
            let hash = Rc::new(RefCell::new(IndexMap::new()));
            FunctionRef::bound(3, &hash)
        };

        assert_eq!(fref.receiver_value(), Some(Value::Empty));
    }
}
