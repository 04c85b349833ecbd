use std::{fmt::Display, sync::Arc};

use crate::{
    error::{DbError, DbResult},
    field::Field,
    record_id::RecordId,
    tuple_desc::TupleDesc,
};

/// A row of fields, together with the location it was read from (if any).
#[derive(Clone, Debug)]
pub struct Tuple {
    desc: Arc<TupleDesc>,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    /// Build a tuple, checking the fields against the descriptor.
    pub fn new(desc: Arc<TupleDesc>, fields: Vec<Field>) -> DbResult<Self> {
        if fields.len() != desc.num_fields() {
            return Err(DbError::TypeMismatch(format!(
                "expected {} fields, got {}",
                desc.num_fields(),
                fields.len()
            )));
        }

        for (i, field) in fields.iter().enumerate() {
            if field.field_type() != desc.field_type(i)? {
                return Err(DbError::TypeMismatch(format!(
                    "field {} is {:?}, expected {:?}",
                    i,
                    field.field_type(),
                    desc.field_type(i)?
                )));
            }
        }

        Ok(Self {
            desc,
            fields: fields.into_iter().map(Field::truncated).collect(),
            record_id: None,
        })
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn field(&self, i: usize) -> DbResult<&Field> {
        self.fields
            .get(i)
            .ok_or_else(|| DbError::NoSuchField(i.to_string()))
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.record_id = rid;
    }

    /// Re-label this tuple with a descriptor of identical types but different names.
    pub(crate) fn with_desc(mut self, desc: Arc<TupleDesc>) -> Self {
        self.desc = desc;
        self
    }
}

impl Display for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.fields.iter().map(|field| field.to_string()).collect();
        write!(f, "{}", parts.join("\t"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        field::{Type, STRING_LEN},
        tuple_desc::TupleDesc,
    };

    use super::*;

    #[test]
    fn test_type_checked() {
        let desc = Arc::new(TupleDesc::from_types(&[Type::Int, Type::String]));

        let t = Tuple::new(desc.clone(), vec![Field::from(1), Field::from("joe")]).unwrap();
        assert_eq!(t.to_string(), "1\tjoe");
        assert!(t.record_id().is_none());

        assert!(Tuple::new(desc.clone(), vec![Field::from(1)]).is_err());
        assert!(Tuple::new(desc, vec![Field::from("joe"), Field::from(1)]).is_err());
    }

    #[test]
    fn test_long_strings_are_cut_to_stored_length() {
        let desc = Arc::new(TupleDesc::from_types(&[Type::String]));
        let t = Tuple::new(desc, vec![Field::Str("z".repeat(200))]).unwrap();
        assert_eq!(t.field(0).unwrap(), &Field::Str("z".repeat(STRING_LEN)));
    }
}
