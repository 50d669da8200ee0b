//! Sizes and emits `DB`/`DW` data items. Shared between pass 1 (which only
//! needs the byte count) and pass 2 (which needs the actual bytes).

use crate::ast::{DataItem, DataWidth};

pub fn item_size(item: &DataItem, width: DataWidth) -> u16 {
    match item {
        DataItem::Int(_) => width.bytes(),
        DataItem::Str(s) => s.len() as u16,
        DataItem::Dup { count, fill } => *count as u16 * item_size(fill, width),
    }
}

pub fn items_size(items: &[DataItem], width: DataWidth) -> u16 {
    items.iter().map(|i| item_size(i, width)).sum()
}

pub fn emit_item(item: &DataItem, width: DataWidth, out: &mut Vec<u8>) {
    match item {
        DataItem::Int(v) => match width {
            DataWidth::Byte => out.push(*v as u8),
            DataWidth::Word => out.extend_from_slice(&(*v as i16 as u16).to_le_bytes()),
        },
        DataItem::Str(s) => out.extend_from_slice(s.as_bytes()),
        DataItem::Dup { count, fill } => {
            for _ in 0..*count {
                emit_item(fill, width, out);
            }
        }
    }
}

pub fn emit_items(items: &[DataItem], width: DataWidth, out: &mut Vec<u8>) {
    for item in items {
        emit_item(item, width, out);
    }
}
