//! Variable types and the codes the module assigns them

use crate::error::{BucketingError, Result};
use ascbind_core::ModuleInstance;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableType {
    Boolean,
    Number,
    String,
    #[serde(rename = "JSON")]
    Json,
}

impl VariableType {
    pub const ALL: [VariableType; 4] = [
        VariableType::Boolean,
        VariableType::Number,
        VariableType::String,
        VariableType::Json,
    ];

    /// Name used by the module, both in its exports and on the wire.
    pub fn name(self) -> &'static str {
        match self {
            VariableType::Boolean => "Boolean",
            VariableType::Number => "Number",
            VariableType::String => "String",
            VariableType::Json => "JSON",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VariableType {
    type Err = BucketingError;

    fn from_str(s: &str) -> Result<Self> {
        VariableType::ALL
            .into_iter()
            .find(|ty| ty.name() == s)
            .ok_or_else(|| BucketingError::UnknownVariableType(s.to_string()))
    }
}

/// Integer codes of [`VariableType`], as exported by one module build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableTypeCodes {
    codes: [i32; 4],
}

impl VariableTypeCodes {
    /// Read the `VariableType.*` globals.
    pub fn read(instance: &ModuleInstance) -> Result<Self> {
        let mut codes = [0; 4];
        for ty in VariableType::ALL {
            codes[ty.index()] = instance.global_i32(&format!("VariableType.{}", ty.name()))?;
        }
        Ok(Self { codes })
    }

    pub fn code(&self, ty: VariableType) -> i32 {
        self.codes[ty.index()]
    }

    pub fn decode(&self, code: i32) -> Result<VariableType> {
        VariableType::ALL
            .into_iter()
            .find(|ty| self.code(*ty) == code)
            .ok_or_else(|| BucketingError::UnknownVariableType(code.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_back() {
        for ty in VariableType::ALL {
            assert_eq!(ty.name().parse::<VariableType>().unwrap(), ty);
        }
        assert!(matches!(
            "Float".parse::<VariableType>(),
            Err(BucketingError::UnknownVariableType(_))
        ));
    }

    #[test]
    fn serde_uses_module_names() {
        assert_eq!(serde_json::to_string(&VariableType::Json).unwrap(), r#""JSON""#);
        assert_eq!(
            serde_json::from_str::<VariableType>(r#""Number""#).unwrap(),
            VariableType::Number
        );
    }

    #[test]
    fn codes_decode_both_ways() {
        let codes = VariableTypeCodes { codes: [10, 11, 12, 13] };
        assert_eq!(codes.code(VariableType::String), 12);
        assert_eq!(codes.decode(13).unwrap(), VariableType::Json);
        assert!(codes.decode(99).is_err());
    }
}
