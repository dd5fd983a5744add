use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::scalar::ScalarValue;

/// A materialized result.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapedValue {
    Scalar(ScalarValue),
    /// Named fields in shaper order.
    Object(Vec<(String, ShapedValue)>),
    Collection(Vec<ShapedValue>),
}

impl ShapedValue {
    pub const NULL: ShapedValue = ShapedValue::Scalar(ScalarValue::Null);

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(ScalarValue::Null))
    }

    pub fn field(&self, name: &str) -> Option<&ShapedValue> {
        match self {
            Self::Object(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            Self::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&[ShapedValue]> {
        match self {
            Self::Collection(vals) => Some(vals),
            _ => None,
        }
    }
}

impl Serialize for ShapedValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Scalar(v) => v.serialize(serializer),
            Self::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (name, value) in fields {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
            Self::Collection(vals) => {
                let mut seq = serializer.serialize_seq(Some(vals.len()))?;
                for val in vals {
                    seq.serialize_element(val)?;
                }
                seq.end()
            }
        }
    }
}
