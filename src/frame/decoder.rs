use super::group::{InformationGroup, CR, LF};
use super::Frame;
use crate::error::FrameError;
use crate::schema::{FieldMask, Schema};
use tracing::{debug, warn};

/// Upper bound on the bytes between STX and ETX. A historic-mode frame is
/// well under 300 bytes.
pub const MAX_FRAME_LENGTH: usize = 512;

/// Turns candidate buffers into validated frames.
#[derive(Debug)]
pub struct Decoder {
    schema: Schema,
    required: FieldMask,
    next_seq: u64,
}

impl Decoder {
    /// Enforces the single-phase required mask.
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            required: FieldMask::SINGLE_PHASE,
            next_seq: 0,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn required(&self) -> FieldMask {
        self.required
    }

    /// Number of frames decoded so far.
    pub fn decoded(&self) -> u64 {
        self.next_seq
    }

    /// Decode one candidate buffer (the bytes between STX and ETX).
    ///
    /// Any rejected group rejects the whole frame.
    pub fn decode(&mut self, buffer: &[u8]) -> Result<Frame, FrameError> {
        if buffer.len() > MAX_FRAME_LENGTH {
            return Err(FrameError::MalformedBuffer);
        }
        if buffer.first() != Some(&LF) || buffer.last() != Some(&CR) {
            return Err(FrameError::MalformedBuffer);
        }

        let mut frame = Frame::new(buffer);
        let mut start = 0;
        for (i, byte) in buffer.iter().enumerate() {
            match *byte {
                LF => start = i + 1,
                CR => {
                    let raw = &buffer[start..i];
                    debug!(group = %String::from_utf8_lossy(raw), len = raw.len(), "information group");
                    let group = InformationGroup::parse(raw)?;
                    let id = self.schema.validate(&group.label, &group.value)?;
                    if frame.insert(id, group.value) {
                        warn!(label = %id, "replacing information group");
                    }
                }
                _ => {}
            }
        }

        let missing = frame.mask().missing(self.required);
        if missing != FieldMask::EMPTY {
            return Err(FrameError::IncompleteFrame {
                found: frame.mask().bits(),
                missing: missing.bits(),
            });
        }

        frame.set_seq(self.next_seq);
        self.next_seq += 1;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldId;

    fn groups(pairs: &[(&str, &str)]) -> Vec<u8> {
        pairs
            .iter()
            .flat_map(|(l, v)| InformationGroup::encode(l, v))
            .collect()
    }

    fn single_phase() -> Vec<(&'static str, &'static str)> {
        vec![
            ("ADCO", "123456789012"),
            ("OPTARIF", "BASE"),
            ("ISOUSC", "30"),
            ("BASE", "012345678"),
            ("PTEC", "TH.."),
            ("IINST", "002"),
            ("IMAX", "030"),
            ("PAPP", "00450"),
            ("MOTDETAT", "000000"),
        ]
    }

    #[test]
    fn decodes_a_complete_frame() {
        let mut decoder = Decoder::new(Schema::new());
        let frame = decoder.decode(&groups(&single_phase())).unwrap();
        assert_eq!(frame.seq(), 0);
        assert_eq!(frame.len(), 9);
        assert_eq!(frame.power(), 450);
        assert_eq!(frame.energy(), 12_345_678);
        assert!(frame.mask().is_superset(FieldMask::SINGLE_PHASE));
        assert!(frame.timestamp().is_none());

        let next = decoder.decode(&groups(&single_phase())).unwrap();
        assert_eq!(next.seq(), 1);
    }

    #[test]
    fn missing_markers() {
        let mut decoder = Decoder::new(Schema::new());
        let buf = groups(&single_phase());
        assert_eq!(decoder.decode(&buf[1..]).unwrap_err(), FrameError::MalformedBuffer);
        assert_eq!(
            decoder.decode(&buf[..buf.len() - 1]).unwrap_err(),
            FrameError::MalformedBuffer
        );
        assert_eq!(decoder.decode(b"").unwrap_err(), FrameError::MalformedBuffer);
    }

    #[test]
    fn each_missing_required_field_is_incomplete() {
        let all = single_phase();
        for skip in 0..all.len() {
            let mut decoder = Decoder::new(Schema::new());
            let mut pairs = all.clone();
            let (label, _) = pairs.remove(skip);
            // plenty of optional fields do not make up for it
            pairs.push(("HCHC", "000000001"));
            pairs.push(("HCHP", "000000002"));
            pairs.push(("PMAX", "06000"));
            let err = decoder.decode(&groups(&pairs)).unwrap_err();
            let id = FieldId::from_label(label).unwrap();
            assert_eq!(
                err,
                FrameError::IncompleteFrame {
                    found: FieldMask::of(&[id]).missing(FieldMask::SINGLE_PHASE).bits()
                        | FieldMask::of(&[FieldId::Hchc, FieldId::Hchp, FieldId::Pmax]).bits(),
                    missing: id.bit(),
                }
            );
            assert_eq!(decoder.decoded(), 0);
        }
    }

    #[test]
    fn one_bad_group_rejects_the_frame() {
        let mut decoder = Decoder::new(Schema::new());
        let mut buf = groups(&single_phase());
        // corrupt the checksum character of the first group
        let cr = buf.iter().position(|b| *b == CR).unwrap();
        buf[cr - 1] = buf[cr - 1].wrapping_add(1);
        assert!(decoder.decode(&buf).unwrap_err().is_checksum());
    }

    #[test]
    fn unknown_and_invalid_values() {
        let mut decoder = Decoder::new(Schema::new());
        let mut pairs = single_phase();
        pairs.push(("FOO", "1"));
        assert_eq!(
            decoder.decode(&groups(&pairs)).unwrap_err(),
            FrameError::UnknownField("FOO".into())
        );

        let mut pairs = single_phase();
        pairs[7] = ("PAPP", "450");
        assert_eq!(
            decoder.decode(&groups(&pairs)).unwrap_err(),
            FrameError::InvalidValue {
                field: FieldId::Papp,
                value: "450".into()
            }
        );
    }

    #[test]
    fn configured_default_is_enforced() {
        let mut schema = Schema::new();
        schema.set_default("OPTARIF", "HC..").unwrap();
        let mut decoder = Decoder::new(schema);
        assert_eq!(
            decoder.decode(&groups(&single_phase())).unwrap_err(),
            FrameError::InvalidValue {
                field: FieldId::Optarif,
                value: "BASE".into()
            }
        );
    }

    #[test]
    fn duplicate_label_latest_wins() {
        let mut decoder = Decoder::new(Schema::new());
        let mut pairs = single_phase();
        pairs.push(("PAPP", "00900"));
        let frame = decoder.decode(&groups(&pairs)).unwrap();
        assert_eq!(frame.len(), 9);
        assert_eq!(frame.get("PAPP"), Some("00900"));
        assert_eq!(frame.power(), 900);
    }

    #[test]
    fn oversized_buffer() {
        let mut decoder = Decoder::new(Schema::new());
        let mut buf = vec![LF; MAX_FRAME_LENGTH + 1];
        buf[MAX_FRAME_LENGTH] = CR;
        assert_eq!(
            decoder.decode(&buf).unwrap_err(),
            FrameError::MalformedBuffer
        );
    }
}
