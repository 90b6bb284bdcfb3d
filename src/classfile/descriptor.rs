//! Field and method descriptor parsing (JVMS §4.3).

use crate::Result;

/// A field type as written in a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `D`
    Double,
    /// `F`
    Float,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `S`
    Short,
    /// `Z`
    Boolean,
    /// `Lname;`, holding the internal name
    Object(String),
    /// `[...]`, holding the whole array descriptor
    Array(String),
}

impl FieldType {
    /// Parses a complete field descriptor.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the descriptor is invalid or has trailing text.
    pub fn parse(descriptor: &str) -> Result<FieldType> {
        let (field_type, rest) = Self::parse_prefix(descriptor)?;
        if !rest.is_empty() {
            return Err(malformed_error!(
                "Trailing characters in field descriptor '{}'",
                descriptor
            ));
        }
        Ok(field_type)
    }

    fn parse_prefix(text: &str) -> Result<(FieldType, &str)> {
        let Some(first) = text.chars().next() else {
            return Err(malformed_error!("Empty field descriptor"));
        };

        let rest = &text[first.len_utf8()..];
        let field_type = match first {
            'B' => FieldType::Byte,
            'C' => FieldType::Char,
            'D' => FieldType::Double,
            'F' => FieldType::Float,
            'I' => FieldType::Int,
            'J' => FieldType::Long,
            'S' => FieldType::Short,
            'Z' => FieldType::Boolean,
            'L' => {
                let Some(end) = rest.find(';') else {
                    return Err(malformed_error!("Unterminated class type in '{}'", text));
                };
                if end == 0 {
                    return Err(malformed_error!("Empty class name in '{}'", text));
                }
                return Ok((FieldType::Object(rest[..end].to_string()), &rest[end + 1..]));
            }
            '[' => {
                let (_, after) = Self::parse_prefix(rest)?;
                let consumed = text.len() - after.len();
                return Ok((FieldType::Array(text[..consumed].to_string()), after));
            }
            other => {
                return Err(malformed_error!(
                    "Invalid descriptor character '{}' in '{}'",
                    other,
                    text
                ))
            }
        };

        Ok((field_type, rest))
    }

    /// Number of local variable slots / stack words this type occupies.
    #[must_use]
    pub fn slots(&self) -> u16 {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }
}

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order
    pub parameters: Vec<FieldType>,
    /// Return type, `None` for `V`
    pub return_type: Option<FieldType>,
}

impl MethodDescriptor {
    /// Parses a method descriptor such as `(ILjava/lang/String;)V`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the descriptor is invalid.
    pub fn parse(descriptor: &str) -> Result<MethodDescriptor> {
        let Some(mut rest) = descriptor.strip_prefix('(') else {
            return Err(malformed_error!(
                "Method descriptor '{}' does not start with '('",
                descriptor
            ));
        };

        let mut parameters = Vec::new();
        loop {
            if let Some(after) = rest.strip_prefix(')') {
                rest = after;
                break;
            }
            let (parameter, after) = FieldType::parse_prefix(rest)?;
            parameters.push(parameter);
            rest = after;
        }

        let return_type = if rest == "V" {
            None
        } else {
            Some(FieldType::parse(rest)?)
        };

        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }

    /// Local variable slots taken by the parameters (excluding `this`).
    #[must_use]
    pub fn parameter_slots(&self) -> u16 {
        self.parameters.iter().map(FieldType::slots).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_types() {
        assert_eq!(FieldType::parse("I").unwrap(), FieldType::Int);
        assert_eq!(
            FieldType::parse("Ljava/lang/String;").unwrap(),
            FieldType::Object("java/lang/String".to_string())
        );
        assert_eq!(
            FieldType::parse("[[J").unwrap(),
            FieldType::Array("[[J".to_string())
        );
        assert!(FieldType::parse("Ljava/lang/String").is_err());
        assert!(FieldType::parse("II").is_err());
        assert!(FieldType::parse("V").is_err());
    }

    #[test]
    fn method_descriptor() {
        let descriptor =
            MethodDescriptor::parse("(Ljava/lang/Class;[Ljava/lang/String;JD)Ljava/lang/Object;")
                .unwrap();
        assert_eq!(descriptor.parameters.len(), 4);
        assert_eq!(descriptor.parameter_slots(), 6);
        assert_eq!(
            descriptor.parameters[1],
            FieldType::Array("[Ljava/lang/String;".to_string())
        );
        assert_eq!(
            descriptor.return_type,
            Some(FieldType::Object("java/lang/Object".to_string()))
        );

        let void = MethodDescriptor::parse("()V").unwrap();
        assert!(void.parameters.is_empty());
        assert!(void.return_type.is_none());

        assert!(MethodDescriptor::parse("I)V").is_err());
        assert!(MethodDescriptor::parse("(I").is_err());
    }
}
