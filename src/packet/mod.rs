//! Packet construction
//!
//! Turns a linked root struct into a TC or TM [`Packet`]: header split,
//! flattened fields with bit positions and PTC/PFC codes, repetition
//! groups, identification and per-field metadata.

mod builder;
mod model;
mod ptc;

pub use builder::{BuildOutput, PacketBuilder};
pub use model::{
    Field, FieldMetadata, IdField, Identification, Packet, PacketKind, PacketMetadata, PiField,
    RangeCheck, RepetitionGroup, StructureId,
};
pub use ptc::{cuc_format, type_code, Category, TypeCode};
