use crate::error::{FrameError, SchemaError};
use std::fmt;

/// Information labels a historic-mode meter may transmit.
///
/// The discriminant doubles as the bit number in a [`FieldMask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum FieldId {
    Adco,
    Optarif,
    Isousc,
    Base,
    Hchc,
    Hchp,
    Ejphn,
    Ejphpm,
    Bbrhcjb,
    Bbrhpjb,
    Bbrhcjw,
    Bbrhpjw,
    Bbrhcjr,
    Bbrhpjr,
    Pejp,
    Ptec,
    Demain,
    Iinst1,
    Iinst2,
    Iinst3,
    Iinst,
    Imax1,
    Imax2,
    Imax3,
    Imax,
    Pmax,
    Papp,
    Hhphc,
    Motdetat,
    Ppot,
    Adps,
}

impl FieldId {
    pub const COUNT: usize = 31;

    pub const ALL: [FieldId; FieldId::COUNT] = [
        FieldId::Adco,
        FieldId::Optarif,
        FieldId::Isousc,
        FieldId::Base,
        FieldId::Hchc,
        FieldId::Hchp,
        FieldId::Ejphn,
        FieldId::Ejphpm,
        FieldId::Bbrhcjb,
        FieldId::Bbrhpjb,
        FieldId::Bbrhcjw,
        FieldId::Bbrhpjw,
        FieldId::Bbrhcjr,
        FieldId::Bbrhpjr,
        FieldId::Pejp,
        FieldId::Ptec,
        FieldId::Demain,
        FieldId::Iinst1,
        FieldId::Iinst2,
        FieldId::Iinst3,
        FieldId::Iinst,
        FieldId::Imax1,
        FieldId::Imax2,
        FieldId::Imax3,
        FieldId::Imax,
        FieldId::Pmax,
        FieldId::Papp,
        FieldId::Hhphc,
        FieldId::Motdetat,
        FieldId::Ppot,
        FieldId::Adps,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn bit(self) -> u32 {
        1 << (self as u32)
    }

    pub fn spec(self) -> &'static FieldSpec {
        &FIELDS[self.index()]
    }

    pub fn label(self) -> &'static str {
        self.spec().label
    }

    pub fn from_label(label: &str) -> Option<FieldId> {
        FIELDS.iter().find(|f| f.label == label).map(|f| f.id)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Fixed-size set of [`FieldId`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldMask(u32);

impl FieldMask {
    pub const EMPTY: FieldMask = FieldMask(0);

    /// Labels every meter sends, whatever its phase count.
    pub const COMMON: FieldMask = FieldMask::of(&[
        FieldId::Adco,
        FieldId::Optarif,
        FieldId::Isousc,
        FieldId::Base,
        FieldId::Ptec,
        FieldId::Papp,
        FieldId::Motdetat,
    ]);

    pub const SINGLE_PHASE: FieldMask =
        FieldMask::COMMON.union(FieldMask::of(&[FieldId::Iinst, FieldId::Imax]));

    pub const THREE_PHASE: FieldMask = FieldMask::COMMON.union(FieldMask::of(&[
        FieldId::Iinst1,
        FieldId::Iinst2,
        FieldId::Iinst3,
        FieldId::Imax1,
        FieldId::Imax2,
        FieldId::Imax3,
    ]));

    pub const fn of(ids: &[FieldId]) -> FieldMask {
        let mut bits = 0u32;
        let mut i = 0;
        while i < ids.len() {
            bits |= 1 << (ids[i] as u32);
            i += 1;
        }
        FieldMask(bits)
    }

    pub const fn union(self, other: FieldMask) -> FieldMask {
        FieldMask(self.0 | other.0)
    }

    pub fn insert(&mut self, id: FieldId) {
        self.0 |= id.bit();
    }

    pub fn contains(self, id: FieldId) -> bool {
        self.0 & id.bit() != 0
    }

    pub fn is_superset(self, other: FieldMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Members of `required` not present in `self`.
    pub fn missing(self, required: FieldMask) -> FieldMask {
        FieldMask(required.0 & !self.0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

/// How a value is typed once it leaves the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Numeric,
    Text,
}

pub type Validator = fn(&str) -> bool;

#[derive(Debug)]
pub struct FieldSpec {
    pub id: FieldId,
    pub label: &'static str,
    pub len: usize,
    pub kind: ValueKind,
    pub validator: Option<Validator>,
}

const fn field(id: FieldId, label: &'static str, len: usize, kind: ValueKind) -> FieldSpec {
    FieldSpec {
        id,
        label,
        len,
        kind,
        validator: None,
    }
}

use ValueKind::{Numeric, Text};

/// Ordered by [`FieldId`] discriminant.
static FIELDS: [FieldSpec; FieldId::COUNT] = [
    // meter address
    field(FieldId::Adco, "ADCO", 12, Text),
    // tariff option
    field(FieldId::Optarif, "OPTARIF", 4, Text),
    // subscribed current (A)
    field(FieldId::Isousc, "ISOUSC", 2, Numeric),
    // base option index (Wh)
    field(FieldId::Base, "BASE", 9, Numeric),
    // off-peak / peak option indexes (Wh)
    field(FieldId::Hchc, "HCHC", 9, Numeric),
    field(FieldId::Hchp, "HCHP", 9, Numeric),
    // EJP option indexes (Wh)
    field(FieldId::Ejphn, "EJPHN", 9, Numeric),
    field(FieldId::Ejphpm, "EJPHPM", 9, Numeric),
    // Tempo option indexes (Wh)
    field(FieldId::Bbrhcjb, "BBRHCJB", 9, Numeric),
    field(FieldId::Bbrhpjb, "BBRHPJB", 9, Numeric),
    field(FieldId::Bbrhcjw, "BBRHCJW", 9, Numeric),
    field(FieldId::Bbrhpjw, "BBRHPJW", 9, Numeric),
    field(FieldId::Bbrhcjr, "BBRHCJR", 9, Numeric),
    field(FieldId::Bbrhpjr, "BBRHPJR", 9, Numeric),
    // EJP start notice (30 min)
    field(FieldId::Pejp, "PEJP", 2, Numeric),
    // current tariff period
    field(FieldId::Ptec, "PTEC", 4, Text),
    // tomorrow's colour
    field(FieldId::Demain, "DEMAIN", 4, Text),
    // instantaneous current (A), per phase then single phase
    field(FieldId::Iinst1, "IINST1", 3, Numeric),
    field(FieldId::Iinst2, "IINST2", 3, Numeric),
    field(FieldId::Iinst3, "IINST3", 3, Numeric),
    field(FieldId::Iinst, "IINST", 3, Numeric),
    // maximum current (A), per phase then single phase
    field(FieldId::Imax1, "IMAX1", 3, Numeric),
    field(FieldId::Imax2, "IMAX2", 3, Numeric),
    field(FieldId::Imax3, "IMAX3", 3, Numeric),
    field(FieldId::Imax, "IMAX", 3, Numeric),
    // maximum three-phase power reached (W)
    field(FieldId::Pmax, "PMAX", 5, Numeric),
    // apparent power (VA)
    field(FieldId::Papp, "PAPP", 5, Numeric),
    // peak/off-peak schedule group
    field(FieldId::Hhphc, "HHPHC", 1, Text),
    // meter status word
    FieldSpec {
        id: FieldId::Motdetat,
        label: "MOTDETAT",
        len: 6,
        kind: Text,
        validator: Some(status_word_is_clear),
    },
    // potentials presence
    field(FieldId::Ppot, "PPOT", 2, Text),
    // subscribed power overrun warning (A)
    field(FieldId::Adps, "ADPS", 3, Numeric),
];

/// MOTDETAT is three hex-encoded bytes. The meaning of individual bits
/// depends on the meter model, so any raised bit is treated as bogus.
fn status_word_is_clear(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != 6 {
        return false;
    }
    bytes.chunks(2).all(|pair| {
        let byte = std::str::from_utf8(pair)
            .ok()
            .and_then(|s| u8::from_str_radix(s, 16).ok());
        byte == Some(0)
    })
}

/// Field table plus the per-field fixed values set by configuration.
///
/// Defaults are set before the schema is handed to a
/// [`Decoder`](crate::frame::Decoder), which owns it from then on.
#[derive(Debug, Clone)]
pub struct Schema {
    defaults: [Option<String>; FieldId::COUNT],
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema {
    pub fn new() -> Self {
        Self {
            defaults: std::array::from_fn(|_| None),
        }
    }

    /// Pin the value `label` must carry in every frame.
    pub fn set_default(&mut self, label: &str, value: &str) -> Result<FieldId, SchemaError> {
        let id =
            FieldId::from_label(label).ok_or_else(|| SchemaError::UnknownField(label.to_string()))?;
        self.defaults[id.index()] = Some(value.to_string());
        Ok(id)
    }

    pub fn default_value(&self, id: FieldId) -> Option<&str> {
        self.defaults[id.index()].as_deref()
    }

    /// Resolve a label and check its value against length, fixed default and
    /// custom validator, in that order.
    pub fn validate(&self, label: &str, value: &str) -> Result<FieldId, FrameError> {
        let id = FieldId::from_label(label)
            .ok_or_else(|| FrameError::UnknownField(label.to_string()))?;
        let spec = id.spec();
        let invalid = || FrameError::InvalidValue {
            field: id,
            value: value.to_string(),
        };

        if value.len() != spec.len {
            return Err(invalid());
        }
        if let Some(expected) = self.default_value(id) {
            if expected != value {
                return Err(invalid());
            }
        }
        if let Some(validate) = spec.validator {
            if !validate(value) {
                return Err(invalid());
            }
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_indexed_by_discriminant() {
        for (i, id) in FieldId::ALL.iter().enumerate() {
            assert_eq!(id.index(), i);
            assert_eq!(id.spec().id, *id);
            assert_eq!(FieldId::from_label(id.label()), Some(*id));
        }
    }

    #[test]
    fn masks() {
        let mut m = FieldMask::EMPTY;
        m.insert(FieldId::Papp);
        assert!(m.contains(FieldId::Papp));
        assert!(!m.contains(FieldId::Base));
        assert!(FieldMask::SINGLE_PHASE.is_superset(FieldMask::COMMON));
        assert!(FieldMask::THREE_PHASE.contains(FieldId::Imax3));
        assert!(!FieldMask::SINGLE_PHASE.contains(FieldId::Iinst1));
        assert_eq!(
            m.missing(FieldMask::of(&[FieldId::Papp, FieldId::Base])),
            FieldMask::of(&[FieldId::Base])
        );
    }

    #[test]
    fn validate_length() {
        let schema = Schema::new();
        assert_eq!(schema.validate("PAPP", "00450"), Ok(FieldId::Papp));
        assert!(matches!(
            schema.validate("PAPP", "450"),
            Err(FrameError::InvalidValue { field: FieldId::Papp, .. })
        ));
        assert_eq!(
            schema.validate("NOPE", "1"),
            Err(FrameError::UnknownField("NOPE".into()))
        );
    }

    #[test]
    fn validate_default_value() {
        let mut schema = Schema::new();
        schema.set_default("OPTARIF", "BASE").unwrap();
        assert_eq!(schema.validate("OPTARIF", "BASE"), Ok(FieldId::Optarif));
        assert!(schema.validate("OPTARIF", "HC..").is_err());
        assert_eq!(
            schema.set_default("BOGUS", "x"),
            Err(SchemaError::UnknownField("BOGUS".into()))
        );
    }

    #[test]
    fn status_word() {
        let schema = Schema::new();
        assert_eq!(schema.validate("MOTDETAT", "000000"), Ok(FieldId::Motdetat));
        assert!(schema.validate("MOTDETAT", "000100").is_err());
        assert!(schema.validate("MOTDETAT", "0000ZZ").is_err());
    }
}
