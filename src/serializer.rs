use std::io::{Read, Write};

use thiserror::Error;

use crate::graph::Float;

/// Errors reported when moving a parameter stream to or from a byte stream.
#[derive(Debug, Error)]
pub enum SerializerError {
    #[error("i/o error on the parameter stream: {0}")]
    Io(#[from] std::io::Error),
    #[error("parameter stream ends in the middle of a value ({0} trailing bytes)")]
    TruncatedStream(usize),
}

/// Data store to/from which the weights of a network can be saved and
/// restored.
///
/// The store is a flat, ordered sequence of 32-bit floats with no header
/// and no shape metadata: nodes write their parameters in a fixed order
/// (weights, weight running average, bias, bias running average for each
/// dense node, in registration order), and reading a stream back requires
/// reconstructing the exact same graph topology first.
#[derive(Debug, Default)]
pub struct NetworkSerializer {
    data: Vec<Float>,
    pos: usize,
}

impl NetworkSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value to the stream.
    pub fn write_weight(&mut self, value: Float) {
        self.data.push(value);
    }

    /// Read the next value from the stream and advance the read pointer.
    pub fn read_weight(&mut self) -> Float {
        assert!(
            self.pos < self.data.len(),
            "read past the end of the parameter stream ({} values)",
            self.data.len()
        );

        let value = self.data[self.pos];
        self.pos += 1;
        value
    }

    /// Rewind the read pointer to the start of the stream.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Values currently held by the serializer.
    pub fn data(&self) -> &[Float] {
        &self.data
    }

    /// Number of values in the serializer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Save the contents of the serializer to a byte stream, little-endian.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<(), SerializerError> {
        for value in &self.data {
            writer.write_all(&value.to_le_bytes())?;
        }

        Ok(())
    }

    /// Append the contents of a byte stream to the serializer.
    pub fn load<R: Read>(&mut self, reader: &mut R) -> Result<(), SerializerError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;

        let mut chunks = bytes.chunks_exact(4);

        for chunk in &mut chunks {
            self.write_weight(Float::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }

        if !chunks.remainder().is_empty() {
            return Err(SerializerError::TruncatedStream(chunks.remainder().len()));
        }

        Ok(())
    }
}
