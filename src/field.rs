//! Per-field query/assignment codec.
//!
//! Every configurable attribute in the protocol shares one convention: a
//! field whose JSON value is the empty string is a query, anything else is
//! an assignment. Queries write the current value back into the tree;
//! assignments decode the value as the field's kind, range-check it
//! against the field's representable interval, store it, and echo the
//! stored value. Narrowing loss is `VALUE_RANGE`; a value that is not
//! decodable as the declared kind at all is `FIELD_ERROR`.

use serde_json::{Map, Value};

use crate::status::Status;

/// A field kind the wire protocol can query and assign.
pub trait FieldValue: Copy {
    /// Encode the current value into the response tree.
    fn to_json(self) -> Value;

    /// Decode and range-check an assigned value.
    fn from_json(value: &Value) -> Result<Self, Status>
    where
        Self: Sized;
}

macro_rules! int_field {
    ($ty:ty) => {
        impl FieldValue for $ty {
            fn to_json(self) -> Value {
                Value::from(i64::from(self))
            }

            fn from_json(value: &Value) -> Result<Self, Status> {
                let wide = if let Some(i) = value.as_i64() {
                    i
                } else if let Some(f) = value.as_f64() {
                    if f.fract() != 0.0 {
                        return Err(Status::ValueRange);
                    }
                    f as i64
                } else {
                    return Err(Status::FieldError);
                };
                <$ty>::try_from(wide).map_err(|_| Status::ValueRange)
            }
        }
    };
}

int_field!(i32);
int_field!(i16);
int_field!(u16);
int_field!(u8);

impl FieldValue for bool {
    fn to_json(self) -> Value {
        Value::Bool(self)
    }

    fn from_json(value: &Value) -> Result<Self, Status> {
        value.as_bool().ok_or(Status::FieldError)
    }
}

impl FieldValue for f32 {
    fn to_json(self) -> Value {
        // fixed-point wire representation: three decimals
        let rounded = (f64::from(self) * 1000.0).round() / 1000.0;
        Value::from(rounded)
    }

    fn from_json(value: &Value) -> Result<Self, Status> {
        let wide = value.as_f64().ok_or(Status::FieldError)?;
        let narrow = wide as f32;
        if !narrow.is_finite() {
            return Err(Status::ValueRange);
        }
        Ok(narrow)
    }
}

/// True when `value` is the query sentinel (empty string).
pub fn is_query(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.is_empty())
}

/// Query or assign one field.
///
/// Returns `OK` after writing the effective value back into `jobj` under
/// `key`; returns the codec error otherwise, leaving the field unchanged.
pub fn process_field<T: FieldValue>(
    jobj: &mut Map<String, Value>,
    key: &str,
    field: &mut T,
) -> Status {
    match jobj.get(key) {
        Some(v) if is_query(v) => {
            jobj.insert(key.to_string(), field.to_json());
            Status::Ok
        }
        Some(v) => match T::from_json(v) {
            Ok(decoded) => {
                *field = decoded;
                jobj.insert(key.to_string(), field.to_json());
                Status::Ok
            }
            Err(status) => status,
        },
        None => Status::FieldError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("k".to_string(), v);
        m
    }

    #[test]
    fn test_query_echoes_current() {
        let mut jobj = obj(json!(""));
        let mut field: i32 = 42;
        assert_eq!(process_field(&mut jobj, "k", &mut field), Status::Ok);
        assert_eq!(jobj["k"], json!(42));
        assert_eq!(field, 42);
    }

    #[test]
    fn test_assignment_stores_and_echoes() {
        let mut jobj = obj(json!(7));
        let mut field: i32 = 0;
        assert_eq!(process_field(&mut jobj, "k", &mut field), Status::Ok);
        assert_eq!(field, 7);
        assert_eq!(jobj["k"], json!(7));
    }

    #[test]
    fn test_narrowing_out_of_range() {
        let mut jobj = obj(json!(300));
        let mut field: u8 = 5;
        assert_eq!(process_field(&mut jobj, "k", &mut field), Status::ValueRange);
        assert_eq!(field, 5);

        let mut jobj = obj(json!(-1));
        let mut field: u16 = 5;
        assert_eq!(process_field(&mut jobj, "k", &mut field), Status::ValueRange);
    }

    #[test]
    fn test_fractional_into_integer() {
        let mut jobj = obj(json!(1.5));
        let mut field: i32 = 0;
        assert_eq!(process_field(&mut jobj, "k", &mut field), Status::ValueRange);
    }

    #[test]
    fn test_wrong_kind_is_field_error() {
        let mut jobj = obj(json!([1, 2]));
        let mut field: i32 = 0;
        assert_eq!(process_field(&mut jobj, "k", &mut field), Status::FieldError);

        let mut jobj = obj(json!(1));
        let mut field = false;
        assert_eq!(process_field(&mut jobj, "k", &mut field), Status::FieldError);
    }

    #[test]
    fn test_bool_round_trip() {
        let mut jobj = obj(json!(true));
        let mut field = false;
        assert_eq!(process_field(&mut jobj, "k", &mut field), Status::Ok);
        assert!(field);

        let mut jobj = obj(json!(""));
        assert_eq!(process_field(&mut jobj, "k", &mut field), Status::Ok);
        assert_eq!(jobj["k"], json!(true));
    }

    #[test]
    fn test_real_field() {
        let mut jobj = obj(json!(1.8));
        let mut field: f32 = 0.0;
        assert_eq!(process_field(&mut jobj, "k", &mut field), Status::Ok);
        assert!((field - 1.8).abs() < 1e-6);
    }
}
