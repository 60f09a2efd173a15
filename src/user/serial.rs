use std::fmt;

use serde::{Deserialize, Serialize};

const SERIAL_WIDTH: usize = 12;

/// Public identity handle, derived once from the internal id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerialNumber(String);

impl SerialNumber {
    /// Zero-pad `id` to twelve digits.
    pub fn from_id(id: i64) -> Self {
        Self(format!("{id:0width$}", width = SERIAL_WIDTH))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SerialNumber {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_id() {
        assert_eq!(SerialNumber::from_id(1).as_str(), "000000000001");
        assert_eq!(SerialNumber::from_id(42).to_string(), "000000000042");
        assert_eq!(SerialNumber::from_id(123_456_789_012).as_str(), "123456789012");
    }
}
