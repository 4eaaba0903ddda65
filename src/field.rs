use crate::convert::{Convert, TypeConverter};
use crate::error::Result;
use crate::reader::RowReader;
use crate::value::NativeClass;

/// Typed access to the fields of the current row.
///
/// One `FieldReader` is bound to one [`RowReader`] for a whole
/// materialization pass and handed to the projector for every row; each
/// access reads the reader's current row, so nothing is rebuilt per row.
pub struct FieldReader<'r> {
    reader: Box<dyn RowReader + 'r>,
    converter: TypeConverter,
}

impl<'r> FieldReader<'r> {
    pub fn new(reader: Box<dyn RowReader + 'r>, converter: TypeConverter) -> Self {
        Self { reader, converter }
    }

    pub fn field_count(&self) -> usize {
        self.reader.field_count()
    }

    pub fn native_class(&self, ordinal: usize) -> Result<NativeClass> {
        self.reader.native_class_of(ordinal)
    }

    pub fn is_null(&self, ordinal: usize) -> Result<bool> {
        self.reader.is_null(ordinal)
    }

    /// Field `ordinal` as `T`. NULL becomes `T`'s default; anything else goes
    /// through the converter and fails if it cannot be represented.
    pub fn get<T: Convert>(&self, ordinal: usize) -> Result<T> {
        if self.reader.is_null(ordinal)? {
            return Ok(T::default_value());
        }
        self.converter.convert(self.reader.value(ordinal)?)
    }

    /// Underlying reader, for its best-effort typed getters.
    pub fn reader(&self) -> &dyn RowReader {
        self.reader.as_ref()
    }

    pub(crate) fn advance(&mut self) -> Result<bool> {
        self.reader.advance()
    }

    pub(crate) fn close(&mut self) {
        self.reader.close()
    }
}
