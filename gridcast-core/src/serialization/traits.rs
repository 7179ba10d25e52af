//! Serialization traits and implementations for primitive types.

use super::{DataInput, DataOutput, ObjectDataInput, ObjectDataOutput};
use crate::error::Result;

/// Trait for types that can be serialized to the grid's binary format.
pub trait Serializable {
    /// Serializes this value to the given output.
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()>;

    /// Convenience method: serializes this value to a byte vector.
    fn to_bytes(&self) -> Result<Vec<u8>>
    where
        Self: Sized,
    {
        let mut output = ObjectDataOutput::new();
        self.serialize(&mut output)?;
        Ok(output.into_bytes())
    }
}

/// Trait for types that can be deserialized from the grid's binary format.
pub trait Deserializable: Sized {
    /// Deserializes a value from the given input.
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self>;

    /// Convenience method: deserializes a value from a byte slice.
    fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut input = ObjectDataInput::new(data);
        Self::deserialize(&mut input)
    }
}

impl Serializable for i8 {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_byte(*self)
    }
}

impl Deserializable for i8 {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        input.read_byte()
    }
}

impl Serializable for i16 {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_short(*self)
    }
}

impl Deserializable for i16 {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        input.read_short()
    }
}

impl Serializable for i32 {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_int(*self)
    }
}

impl Deserializable for i32 {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        input.read_int()
    }
}

impl Serializable for i64 {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_long(*self)
    }
}

impl Deserializable for i64 {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        input.read_long()
    }
}

impl Serializable for f32 {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_float(*self)
    }
}

impl Deserializable for f32 {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        input.read_float()
    }
}

impl Serializable for f64 {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_double(*self)
    }
}

impl Deserializable for f64 {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        input.read_double()
    }
}

impl Serializable for bool {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_bool(*self)
    }
}

impl Deserializable for bool {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        input.read_bool()
    }
}

impl Serializable for String {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_string(self)
    }
}

impl Deserializable for String {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        input.read_string()
    }
}

impl Serializable for &str {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_string(self)
    }
}

impl Serializable for Vec<u8> {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_byte_array(self)
    }
}

impl Deserializable for Vec<u8> {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        input.read_byte_array()
    }
}

macro_rules! impl_array_serialization {
    ($($ty:ty),*) => {
        $(
            impl Serializable for Vec<$ty> {
                fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
                    output.write_int(self.len() as i32)?;
                    for item in self {
                        item.serialize(output)?;
                    }
                    Ok(())
                }
            }

            impl Deserializable for Vec<$ty> {
                fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
                    let len = input.read_int()?;
                    let mut items = Vec::with_capacity(len.max(0) as usize);
                    for _ in 0..len {
                        items.push(<$ty>::deserialize(input)?);
                    }
                    Ok(items)
                }
            }
        )*
    };
}

impl_array_serialization!(i16, i32, i64, f32, f64, String);

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T>(value: T) -> T
    where
        T: Serializable + Deserializable,
    {
        T::from_bytes(&value.to_bytes().unwrap()).unwrap()
    }

    #[test]
    fn test_scalar_identity() {
        assert_eq!(roundtrip(-7i8), -7);
        assert_eq!(roundtrip(-3000i16), -3000);
        assert_eq!(roundtrip(1_000_000i32), 1_000_000);
        assert_eq!(roundtrip(i64::MIN), i64::MIN);
        assert_eq!(roundtrip(3.25f32), 3.25);
        assert_eq!(roundtrip(-0.125f64), -0.125);
        assert!(roundtrip(true));
        assert!(!roundtrip(false));
    }

    #[test]
    fn test_string_identity() {
        assert_eq!(roundtrip("grid".to_string()), "grid");
        assert_eq!(roundtrip(String::new()), "");
    }

    #[test]
    fn test_byte_vec_identity() {
        assert_eq!(roundtrip(vec![1u8, 2, 3]), vec![1, 2, 3]);
    }

    #[test]
    fn test_nested_vec_identity() {
        let values = vec![10i64, -20, 30];
        assert_eq!(roundtrip(values.clone()), values);

        let strings = vec!["a".to_string(), "bb".to_string()];
        assert_eq!(roundtrip(strings.clone()), strings);
    }

    #[test]
    fn test_float_precision_preserved() {
        let v = f64::from_bits(0x400921FB54442D18); // pi
        assert_eq!(roundtrip(v).to_bits(), v.to_bits());
    }
}
