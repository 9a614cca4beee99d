use crate::error::FrameError;

pub const LF: u8 = 0x0a;
pub const CR: u8 = 0x0d;
pub const SP: u8 = 0x20;

/// One `LABEL SP VALUE SP CHECKSUM` reading, as found between LF and CR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InformationGroup {
    pub label: String,
    pub value: String,
    pub checksum: u8,
}

/// Sum of the bytes from the first label byte to the last value byte
/// (separator included), low 6 bits kept, shifted into printable range.
///
/// This is a 6-bit sum, not a CRC: two compensating corruptions, or a single
/// one that changes the sum by a multiple of 64, goes undetected.
pub fn checksum(payload: &[u8]) -> u8 {
    let sum = payload.iter().fold(0u32, |acc, b| acc.wrapping_add(*b as u32));
    (sum & 0x3f) as u8 + 0x20
}

impl InformationGroup {
    /// Parse the bytes strictly between LF and CR.
    ///
    /// The checksum is checked before anything else is trusted.
    pub fn parse(group: &[u8]) -> Result<Self, FrameError> {
        if group.len() < 2 {
            return Err(FrameError::MalformedGroup(lossy(group)));
        }
        let found = group[group.len() - 1];
        // drop the separator preceding the checksum character
        let payload = &group[..group.len() - 2];
        let expected = checksum(payload);
        if expected != found {
            return Err(FrameError::InvalidChecksum { expected, found });
        }

        let text =
            std::str::from_utf8(payload).map_err(|_| FrameError::MalformedGroup(lossy(payload)))?;
        let mut tokens = text.split([' ', '|']).filter(|t| !t.is_empty());
        match (tokens.next(), tokens.next()) {
            (Some(label), Some(value)) => Ok(Self {
                label: label.to_string(),
                value: value.to_string(),
                checksum: found,
            }),
            _ => Err(FrameError::MalformedGroup(text.to_string())),
        }
    }

    /// Wire form of a group, LF and CR included.
    pub fn encode(label: &str, value: &str) -> Vec<u8> {
        let mut payload = Vec::with_capacity(label.len() + value.len() + 1);
        payload.extend_from_slice(label.as_bytes());
        payload.push(SP);
        payload.extend_from_slice(value.as_bytes());

        let mut out = Vec::with_capacity(payload.len() + 4);
        out.push(LF);
        out.extend_from_slice(&payload);
        out.push(SP);
        out.push(checksum(&payload));
        out.push(CR);
        out
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
