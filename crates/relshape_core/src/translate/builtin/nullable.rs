use crate::expr::{SqlExpr, is_not_null};
use crate::translate::MemberTranslator;
use crate::translate::descriptor::{MemberDescriptor, types};

/// `Value` and `HasValue` on nullable values.
#[derive(Debug, Clone, Copy)]
pub struct NullableMemberTranslator;

impl MemberTranslator for NullableMemberTranslator {
    fn translate(&self, instance: &SqlExpr, member: &MemberDescriptor) -> Option<SqlExpr> {
        if member.declaring_type != types::NULLABLE {
            return None;
        }

        match member.name.as_str() {
            "Value" => Some(instance.clone()),
            "HasValue" => Some(is_not_null(instance.clone())),
            _ => None,
        }
    }
}
