//! Font descriptor layouts and the face/character-set substitution applied to every font the
//! game creates.

use crate::text::{self, Multibyte};

/// `LF_FACESIZE`, including the terminator.
pub const FACE_SIZE: usize = 32;

pub const GB2312_CHARSET: u8 = 134;

/// SimHei.
pub const DEFAULT_FACE: &str = "黑体";

/// `LOGFONTA`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFontA {
    pub height: i32,
    pub width: i32,
    pub escapement: i32,
    pub orientation: i32,
    pub weight: i32,
    pub italic: u8,
    pub underline: u8,
    pub strike_out: u8,
    pub char_set: u8,
    pub out_precision: u8,
    pub clip_precision: u8,
    pub quality: u8,
    pub pitch_and_family: u8,
    pub face_name: [u8; FACE_SIZE],
}

/// `LOGFONTW`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFontW {
    pub height: i32,
    pub width: i32,
    pub escapement: i32,
    pub orientation: i32,
    pub weight: i32,
    pub italic: u8,
    pub underline: u8,
    pub strike_out: u8,
    pub char_set: u8,
    pub out_precision: u8,
    pub clip_precision: u8,
    pub quality: u8,
    pub pitch_and_family: u8,
    pub face_name: [u16; FACE_SIZE],
}

/// Forces one face and character set onto every font while keeping its geometry and style.
#[derive(Debug, Clone)]
pub struct FontPolicy {
    face: [u16; FACE_SIZE],
    face_name: String,
    char_set: u8,
    source_code_page: u32,
}

impl FontPolicy {
    /// Faces longer than `FACE_SIZE - 1` UTF-16 units are truncated.
    pub fn new(face_name: &str, char_set: u8, source_code_page: u32) -> FontPolicy {
        let mut face = [0u16; FACE_SIZE];

        for (slot, unit) in face[..FACE_SIZE - 1]
            .iter_mut()
            .zip(face_name.encode_utf16())
        {
            *slot = unit;
        }

        let len = face.iter().position(|unit| *unit == 0).unwrap_or(FACE_SIZE);

        FontPolicy {
            face,
            face_name: String::from_utf16_lossy(&face[..len]),
            char_set,
            source_code_page,
        }
    }

    pub fn face_name(&self) -> &str {
        &self.face_name
    }

    pub fn char_set(&self) -> u8 {
        self.char_set
    }

    pub fn apply(&self, source: &LogFontA) -> LogFontW {
        LogFontW {
            height: source.height,
            width: source.width,
            escapement: source.escapement,
            orientation: source.orientation,
            weight: source.weight,
            italic: source.italic,
            underline: source.underline,
            strike_out: source.strike_out,
            char_set: self.char_set,
            out_precision: source.out_precision,
            clip_precision: source.clip_precision,
            quality: source.quality,
            pitch_and_family: source.pitch_and_family,
            face_name: self.face,
        }
    }

    /// The face the game asked for, as UTF-8. Undecodable names are returned escaped.
    pub fn describe_source_face(&self, source: &LogFontA, text: &dyn Multibyte) -> String {
        let bytes = face_bytes(&source.face_name);

        if bytes.is_empty() {
            return String::new();
        }

        match text.widen(self.source_code_page, bytes) {
            Some(wide) if !wide.is_empty() => text::to_utf8(wide.as_slice()),
            _ => text::escape_bytes(bytes),
        }
    }
}

impl Default for FontPolicy {
    fn default() -> FontPolicy {
        FontPolicy::new(DEFAULT_FACE, GB2312_CHARSET, text::SHIFT_JIS)
    }
}

/// The face name up to its terminator. A name that fills the whole array is used as is.
fn face_bytes(face: &[u8; FACE_SIZE]) -> &[u8] {
    let len = face.iter().position(|byte| *byte == 0).unwrap_or(FACE_SIZE);
    &face[..len]
}
