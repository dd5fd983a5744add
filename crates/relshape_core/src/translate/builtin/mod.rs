//! Built in translators.

pub mod collate;
pub mod comparison;
pub mod has_flag;
pub mod math;
pub mod nullable;
pub mod row_value;
pub mod sequence_equal;
pub mod string;

use super::TranslatorRegistry;

pub fn register_all(registry: &mut TranslatorRegistry) {
    registry.add_method_translator(sequence_equal::ByteArraySequenceEqualTranslator);
    registry.add_method_translator(string::IsNullOrEmptyTranslator);
    registry.add_method_translator(string::StringConcatTranslator);
    registry.add_method_translator(string::StringMethodTranslator);
    registry.add_method_translator(comparison::CompareTranslator);
    registry.add_method_translator(comparison::EqualsTranslator);
    registry.add_method_translator(has_flag::HasFlagTranslator);
    registry.add_method_translator(row_value::RowValueComparisonTranslator);
    registry.add_method_translator(collate::CollateTranslator);
    registry.add_method_translator(math::MathTranslator);

    registry.add_member_translator(nullable::NullableMemberTranslator);
    registry.add_member_translator(string::StringLengthTranslator);
}
