/// Four byte tag value.
pub type Tag = u32;

/// Creates a tag from four bytes.
pub const fn tag_from_bytes(bytes: &[u8; 4]) -> Tag {
    (bytes[0] as u32) << 24 | (bytes[1] as u32) << 16 | (bytes[2] as u32) << 8 | bytes[3] as u32
}

/// Creates a tag from the first four bytes of a string, inserting
/// spaces for any missing bytes.
pub fn tag_from_str_lossy(s: &str) -> Tag {
    let mut bytes = [b' '; 4];
    for (i, b) in s.as_bytes().iter().enumerate().take(4) {
        bytes[i] = *b;
    }
    tag_from_bytes(&bytes)
}

/// Formats a tag as its four ASCII bytes, replacing non-printable bytes.
pub fn tag_to_string(tag: Tag) -> String {
    tag.to_be_bytes()
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '?'
            }
        })
        .collect()
}

/// Default script tag, substituted when the caller passes no script.
pub const DFLT_SCRIPT: Tag = tag_from_bytes(b"DFLT");

/// Default language-system tag, substituted when the caller passes no
/// language.
pub const DFLT_LANG: Tag = tag_from_bytes(b"dflt");

/// Well-known feature tags referenced by the planner's derivation rules.
pub mod features {
    use super::{tag_from_bytes, Tag};

    // Substitution features.
    pub const CCMP: Tag = tag_from_bytes(b"ccmp");
    pub const LOCL: Tag = tag_from_bytes(b"locl");
    pub const RVRN: Tag = tag_from_bytes(b"rvrn");
    pub const LIGA: Tag = tag_from_bytes(b"liga");
    pub const CLIG: Tag = tag_from_bytes(b"clig");
    pub const RLIG: Tag = tag_from_bytes(b"rlig");
    pub const CALT: Tag = tag_from_bytes(b"calt");
    pub const RAND: Tag = tag_from_bytes(b"rand");
    pub const ISOL: Tag = tag_from_bytes(b"isol");
    pub const INIT: Tag = tag_from_bytes(b"init");
    pub const MEDI: Tag = tag_from_bytes(b"medi");
    pub const MED2: Tag = tag_from_bytes(b"med2");
    pub const FINA: Tag = tag_from_bytes(b"fina");
    pub const FIN2: Tag = tag_from_bytes(b"fin2");
    pub const FIN3: Tag = tag_from_bytes(b"fin3");
    pub const MSET: Tag = tag_from_bytes(b"mset");
    pub const NUKT: Tag = tag_from_bytes(b"nukt");
    pub const AKHN: Tag = tag_from_bytes(b"akhn");
    pub const RPHF: Tag = tag_from_bytes(b"rphf");
    pub const PREF: Tag = tag_from_bytes(b"pref");
    pub const RKRF: Tag = tag_from_bytes(b"rkrf");
    pub const ABVF: Tag = tag_from_bytes(b"abvf");
    pub const BLWF: Tag = tag_from_bytes(b"blwf");
    pub const HALF: Tag = tag_from_bytes(b"half");
    pub const PSTF: Tag = tag_from_bytes(b"pstf");
    pub const VATU: Tag = tag_from_bytes(b"vatu");
    pub const CJCT: Tag = tag_from_bytes(b"cjct");
    pub const PRES: Tag = tag_from_bytes(b"pres");
    pub const ABVS: Tag = tag_from_bytes(b"abvs");
    pub const BLWS: Tag = tag_from_bytes(b"blws");
    pub const PSTS: Tag = tag_from_bytes(b"psts");
    pub const HALN: Tag = tag_from_bytes(b"haln");

    // Positioning features.
    pub const KERN: Tag = tag_from_bytes(b"kern");
    pub const DIST: Tag = tag_from_bytes(b"dist");
    pub const ABVM: Tag = tag_from_bytes(b"abvm");
    pub const BLWM: Tag = tag_from_bytes(b"blwm");
    pub const CURS: Tag = tag_from_bytes(b"curs");
    pub const MARK: Tag = tag_from_bytes(b"mark");
    pub const MKMK: Tag = tag_from_bytes(b"mkmk");

    /// Arabic-style shaping features that default to manual ZWJ handling.
    pub const JOINING: [Tag; 7] = [ISOL, INIT, MEDI, MED2, FINA, FIN2, FIN3];

    /// Indic/Brahmic orthographic features that default to per-syllable
    /// application.
    pub const SYLLABIC: [Tag; 14] = [
        NUKT, AKHN, RPHF, PREF, RKRF, ABVF, BLWF, HALF, PSTF, VATU, CJCT, PRES, ABVS, BLWS,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trip() {
        let t = tag_from_bytes(b"liga");
        assert_eq!(t, tag_from_str_lossy("liga"));
        assert_eq!(tag_to_string(t), "liga");
    }

    #[test]
    fn short_tags_pad_with_spaces() {
        assert_eq!(tag_from_str_lossy("kern"), features::KERN);
        assert_eq!(tag_from_str_lossy("ab"), tag_from_bytes(b"ab  "));
    }
}
