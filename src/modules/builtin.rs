//! Default native module: conversions, aggregate helpers, iteration
//! support and output control.

use chrono::{NaiveDate, NaiveDateTime, Utc};

use crate::error::FaultKind;
use crate::interpreter::Interpreter;
use crate::modules::{NativeModule, DEFAULT_MODULE};
use crate::value::{Value, ValueIter};

const MAX_FLATTEN_DEPTH: usize = 64;

pub(super) fn module() -> NativeModule {
    NativeModule::new(DEFAULT_MODULE)
        .with_constant("null", Value::Empty)
        .with_constant("true", Value::Boolean(true))
        .with_constant("false", Value::Boolean(false))
        .with_function("ToNumber", 1, to_number)
        .with_function("ToDate", 1, to_date)
        .with_function("Defined", 1, defined)
        .with_function("Type", 1, type_name)
        .with_function("DateNow", 0, date_now)
        .with_function("DateDiff", 3, date_diff)
        .with_function("Length", 1, length)
        .with_function("Add", 2, add)
        .with_function("Find", 2, find)
        .with_function("Delete", 2, delete)
        .with_function("RangeArray", 2, range_array)
        .with_function("Flatten", 1, flatten)
        .with_function("SortWith", 2, sort_with)
        .with_function("Slice", 3, slice)
        .with_function("_iter_create$", 1, iter_create)
        .with_function("_iter_hasnext$", 1, iter_has_next)
        .with_function("_iter_next$", 1, iter_next)
        .with_function("Format", 2, format_output)
        .with_function("Context", 1, output_context)
}

fn to_number(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let number = match vm.pop()? {
        Value::Empty => 0.0,
        Value::Number(n) => n,
        Value::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| FaultKind::InvalidNumber(s.clone()))?,
        Value::Boolean(b) => {
            if b {
                1.0
            } else {
                0.0
            }
        }
        Value::Date(d) => d.and_utc().timestamp() as f64,
        other => {
            return Err(FaultKind::TypeMismatch {
                expected: "number, text, boolean or date",
                found: other.kind_name(),
            })
        }
    };

    vm.push(Value::Number(number));
    Ok(())
}

fn parse_date(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn to_date(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let date = match vm.pop()? {
        Value::Date(d) => d,
        Value::Text(s) => parse_date(&s).ok_or(FaultKind::InvalidDate(s))?,
        Value::Number(n) => chrono::DateTime::from_timestamp(n as i64, 0)
            .map(|d| d.naive_utc())
            .ok_or_else(|| FaultKind::InvalidDate(n.to_string()))?,
        other => {
            return Err(FaultKind::TypeMismatch {
                expected: "date, text or number",
                found: other.kind_name(),
            })
        }
    };

    vm.push(Value::Date(date));
    Ok(())
}

fn defined(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let value = vm.pop()?;
    vm.push(Value::Boolean(!matches!(value, Value::Empty)));
    Ok(())
}

fn type_name(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let value = vm.pop()?;
    vm.push(Value::Text(value.kind_name().to_string()));
    Ok(())
}

fn date_now(vm: &mut Interpreter) -> Result<(), FaultKind> {
    vm.push(Value::Date(Utc::now().naive_utc()));
    Ok(())
}

/// Difference between two dates as a whole count of units, truncated
/// toward zero. Units: `y` = days/365, `m` = days/30, `d` = days.
fn date_diff(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let unit = vm.pop_text()?;
    let to = vm.pop_date()?;
    let from = vm.pop_date()?;

    let days = (to - from).num_days();
    let count = match unit.as_str() {
        "y" => days / 365,
        "m" => days / 30,
        "d" => days,
        _ => return Err(FaultKind::InvalidDateUnit(unit)),
    };

    vm.push(Value::Number(count as f64));
    Ok(())
}

fn length(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let len = match vm.pop()? {
        Value::Empty => 0,
        Value::Text(s) => s.chars().count(),
        Value::Array(items) => items.borrow().len(),
        Value::Hash(entries) => entries.borrow().len(),
        other => {
            return Err(FaultKind::TypeMismatch {
                expected: "text, array or hash",
                found: other.kind_name(),
            })
        }
    };

    vm.push(Value::Number(len as f64));
    Ok(())
}

fn add(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let value = vm.pop()?;
    let items = vm.pop_array()?;

    items.borrow_mut().push(value);
    Ok(())
}

/// Asymmetric lookup kept from the source language: arrays yield the
/// matching element itself (or `Empty`), hashes yield key presence.
fn find(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let needle = vm.pop()?;
    let result = match vm.pop()? {
        Value::Array(items) => items
            .borrow()
            .iter()
            .find(|item| **item == needle)
            .cloned()
            .unwrap_or(Value::Empty),
        Value::Hash(entries) => Value::Boolean(entries.borrow().contains_key(&needle.to_string())),
        other => {
            return Err(FaultKind::TypeMismatch {
                expected: "array or hash",
                found: other.kind_name(),
            })
        }
    };

    vm.push(result);
    Ok(())
}

fn delete(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let key = vm.pop()?;

    match vm.pop()? {
        Value::Array(items) => {
            let index = match key {
                Value::Number(n) => n as i64,
                other => {
                    return Err(FaultKind::TypeMismatch {
                        expected: "number",
                        found: other.kind_name(),
                    })
                }
            };
            let len = items.borrow().len();

            if index < 0 || index as usize >= len {
                return Err(FaultKind::IndexOutOfRange { index, len });
            }

            items.borrow_mut().remove(index as usize);
        }
        Value::Hash(entries) => {
            entries.borrow_mut().shift_remove(&key.to_string());
        }
        other => {
            return Err(FaultKind::TypeMismatch {
                expected: "array or hash",
                found: other.kind_name(),
            })
        }
    }

    Ok(())
}

/// Inclusive numeric range with an automatic ±1 step.
fn range_array(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let end = vm.pop_number()?;
    let start = vm.pop_number()?;

    let mut items = Vec::new();
    let step = if start <= end { 1.0 } else { -1.0 };
    let mut current = start;

    while (step > 0.0 && current <= end) || (step < 0.0 && current >= end) {
        items.push(Value::Number(current));
        current += step;
    }

    vm.push(Value::array(items));
    Ok(())
}

fn flatten(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let items = vm.pop_array()?;

    let mut flat = Vec::new();
    flatten_into(&items.borrow(), &mut flat, 0)?;

    vm.push(Value::array(flat));
    Ok(())
}

fn flatten_into(items: &[Value], out: &mut Vec<Value>, depth: usize) -> Result<(), FaultKind> {
    if depth > MAX_FLATTEN_DEPTH {
        return Err(FaultKind::NestingTooDeep);
    }

    for item in items {
        match item {
            Value::Array(nested) => flatten_into(&nested.borrow(), out, depth + 1)?,
            other => out.push(other.clone()),
        }
    }

    Ok(())
}

/// In-place sort driven by a script comparator; each comparison re-enters
/// the dispatch loop.
fn sort_with(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let comparator = vm.pop_function()?;
    let items = vm.pop_array()?;

    let unsorted = items.borrow().clone();
    let mut sorted: Vec<Value> = Vec::with_capacity(unsorted.len());

    for item in unsorted {
        let mut index = sorted.len();

        while index > 0 {
            let verdict =
                vm.execute_function_ref(&comparator, &[sorted[index - 1].clone(), item.clone()])?;

            let ordering = match verdict {
                Value::Number(n) => n,
                other => {
                    return Err(FaultKind::TypeMismatch {
                        expected: "number",
                        found: other.kind_name(),
                    })
                }
            };

            if ordering > 0.0 {
                index -= 1;
            } else {
                break;
            }
        }

        sorted.insert(index, item);
    }

    *items.borrow_mut() = sorted;
    Ok(())
}

/// Sub-sequence of a text or array; an `Empty` length means "to the end".
fn slice(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let length = match vm.pop()? {
        Value::Empty => None,
        Value::Number(n) => Some((n.max(0.0)) as usize),
        other => {
            return Err(FaultKind::TypeMismatch {
                expected: "number or empty",
                found: other.kind_name(),
            })
        }
    };
    let start = vm.pop_number()?.max(0.0) as usize;

    let result = match vm.pop()? {
        Value::Text(s) => {
            let taken: String = match length {
                Some(count) => s.chars().skip(start).take(count).collect(),
                None => s.chars().skip(start).collect(),
            };
            Value::Text(taken)
        }
        Value::Array(items) => {
            let items = items.borrow();
            let taken: Vec<Value> = match length {
                Some(count) => items.iter().skip(start).take(count).cloned().collect(),
                None => items.iter().skip(start).cloned().collect(),
            };
            Value::array(taken)
        }
        other => {
            return Err(FaultKind::TypeMismatch {
                expected: "text or array",
                found: other.kind_name(),
            })
        }
    };

    vm.push(result);
    Ok(())
}

fn iter_create(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let target = vm.pop()?;

    if matches!(target, Value::Iterator(_)) {
        return Err(FaultKind::InvalidIteratorTarget("iterator"));
    }

    vm.push(Value::Iterator(std::rc::Rc::new(std::cell::RefCell::new(
        ValueIter::new(target),
    ))));
    Ok(())
}

fn iter_has_next(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let iter = vm.pop_iterator()?;
    let has_next = iter.borrow().has_next();

    vm.push(Value::Boolean(has_next));
    Ok(())
}

fn iter_next(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let iter = vm.pop_iterator()?;
    let value = iter.borrow_mut().next_value();

    vm.push(value);
    Ok(())
}

/// Placeholder formatter: emits a literal marker line instead of applying
/// an actual format.
fn format_output(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let params = vm.pop()?;
    let name = vm.pop()?;

    vm.emit_text(format!("!== FORMAT: {name} {params} ==!"));
    Ok(())
}

fn output_context(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let name = vm.pop_text()?;

    vm.select_output(&name);
    Ok(())
}
