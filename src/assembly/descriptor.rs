//! Slot sizes of field and method descriptors (JVMS §4.3).

use crate::Result;

/// Operand stack slots taken by a value of the given field descriptor.
///
/// `V` is accepted and yields 0 so return types can be sized with the same function.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for anything that is not a single complete type.
pub fn field_slots(descriptor: &str) -> Result<u16> {
    let bytes = descriptor.as_bytes();
    if bytes == b"V" {
        return Ok(0);
    }
    let (slots, consumed) = parse_type(bytes, 0)?;
    if consumed != bytes.len() {
        return Err(malformed_error!("Invalid field descriptor {}", descriptor));
    }
    Ok(slots)
}

/// Argument and return slot sizes of a method descriptor.
///
/// The argument count does not include the receiver of instance methods.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for an invalid descriptor.
pub fn method_slots(descriptor: &str) -> Result<(u16, u16)> {
    let bytes = descriptor.as_bytes();
    if bytes.first() != Some(&b'(') {
        return Err(malformed_error!("Invalid method descriptor {}", descriptor));
    }

    let mut position = 1;
    let mut arguments: u16 = 0;
    loop {
        match bytes.get(position) {
            Some(b')') => break,
            Some(_) => {
                let (slots, next) = parse_type(bytes, position)?;
                arguments = arguments.saturating_add(slots);
                position = next;
            }
            None => return Err(malformed_error!("Unterminated method descriptor {}", descriptor)),
        }
    }

    let returns = field_slots(&descriptor[position + 1..])?;
    Ok((arguments, returns))
}

/// Parse one field type starting at `position`; returns its slot size and the position
/// just past it.
fn parse_type(bytes: &[u8], position: usize) -> Result<(u16, usize)> {
    match bytes.get(position) {
        Some(b'B' | b'C' | b'F' | b'I' | b'S' | b'Z') => Ok((1, position + 1)),
        Some(b'J' | b'D') => Ok((2, position + 1)),
        Some(b'L') => {
            let end = bytes[position..]
                .iter()
                .position(|&b| b == b';')
                .ok_or_else(|| malformed_error!("Unterminated class type in descriptor"))?;
            if end < 2 {
                return Err(malformed_error!("Empty class type in descriptor"));
            }
            Ok((1, position + end + 1))
        }
        Some(b'[') => {
            let mut element = position;
            while bytes.get(element) == Some(&b'[') {
                element += 1;
            }
            let (_, next) = parse_type(bytes, element)?;
            Ok((1, next))
        }
        Some(other) => Err(malformed_error!(
            "Invalid descriptor character '{}'",
            char::from(*other)
        )),
        None => Err(malformed_error!("Truncated descriptor")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields() {
        assert_eq!(field_slots("I").unwrap(), 1);
        assert_eq!(field_slots("J").unwrap(), 2);
        assert_eq!(field_slots("D").unwrap(), 2);
        assert_eq!(field_slots("Ljava/lang/String;").unwrap(), 1);
        assert_eq!(field_slots("[[J").unwrap(), 1);
        assert_eq!(field_slots("V").unwrap(), 0);
        assert!(field_slots("").is_err());
        assert!(field_slots("II").is_err());
        assert!(field_slots("Ljava/lang/String").is_err());
        assert!(field_slots("Q").is_err());
    }

    #[test]
    fn methods() {
        assert_eq!(method_slots("()V").unwrap(), (0, 0));
        assert_eq!(method_slots("(Ljava/lang/String;I)V").unwrap(), (2, 0));
        assert_eq!(method_slots("(Ljava/lang/String;IJ)V").unwrap(), (4, 0));
        assert_eq!(method_slots("()J").unwrap(), (0, 2));
        assert_eq!(method_slots("([DJ[[Ljava/lang/Object;)D").unwrap(), (4, 2));
        assert!(method_slots("I)V").is_err());
        assert!(method_slots("(I").is_err());
        assert!(method_slots("(I)").is_err());
    }
}
