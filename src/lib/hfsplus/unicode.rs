//! HFS+ Unicode rules.
//!
//! Three concerns live here, and all three deviate from stock Unicode
//! in ways that on-disk compatibility depends on:
//!
//! * UTF-16 name conversion with the `/` ↔ `:` swap. HFS+ stores `:`
//!   as the path separator, so a `/` inside a stored name surfaces to
//!   UNIX as `:` and vice versa.
//! * A variant of NFD in which U+2000..U+2FFF, U+F900..U+FAFF and
//!   everything outside the BMP are left composed. Codepoints outside
//!   the decomposition range do not take part in combining-class
//!   reordering either.
//! * The case-insensitive key order of TN1150's FastUnicodeCompare:
//!   names compare unit-by-unit through a fold in which U+0000 orders
//!   after every other unit and a small set of format characters is
//!   skipped outright.

use std::cmp::Ordering;
use std::fmt;

use unicode_normalization::char::{canonical_combining_class, decompose_canonical};

use crate::error::{Error, Result};

/// HFS+ names are at most 255 UTF-16 code units.
pub const NAME_MAX_UNITS: usize = 255;
/// Worst-case UTF-8 expansion of a name, including the terminator the
/// C API reserved. Kept for API parity with the on-disk bound.
pub const NAME_MAX_UTF8: usize = 512;

/// Decode on-disk UTF-16. Unpaired surrogates are `InvalidName`.
pub fn utf16_to_utf8(units: &[u16]) -> Result<String> {
    if units.len() > NAME_MAX_UNITS {
        return Err(Error::InvalidName);
    }
    char::decode_utf16(units.iter().copied())
        .collect::<std::result::Result<String, _>>()
        .map_err(|_| Error::InvalidName)
}

/// Lenient variant: unpaired surrogates become U+FFFD.
pub fn utf16_to_utf8_lossy(units: &[u16]) -> String {
    String::from_utf16_lossy(units)
}

/// On-disk name to UNIX path element: any stored `/` becomes `:`.
pub fn name_to_unix(units: &[u16]) -> Result<String> {
    Ok(utf16_to_utf8(units)?.replace('/', ":"))
}

pub fn name_to_unix_lossy(units: &[u16]) -> String {
    utf16_to_utf8_lossy(units).replace('/', ":")
}

/// UNIX path element to on-disk UTF-16: normalize, then map `:` back
/// to the `/` HFS+ stores.
pub fn name_from_unix(elem: &str) -> Result<Vec<u16>> {
    let normalized = hfs_nfd(elem);
    let units: Vec<u16> = normalized.replace(':', "/").encode_utf16().collect();
    if units.len() > NAME_MAX_UNITS {
        return Err(Error::InvalidName);
    }
    Ok(units)
}

/// True for codepoints HFS+ decomposes and reorders: the BMP minus
/// U+2000..U+2FFF and U+F900..U+FAFF. Astral codepoints pass through
/// untouched.
fn in_decomposition_range(c: char) -> bool {
    let cp = c as u32;
    cp <= 0xFFFF && !(0x2000..=0x2FFF).contains(&cp) && !(0xF900..=0xFAFF).contains(&cp)
}

/// Apply HFS+'s variant NFD. The result is what the volume stores and
/// what catalog keys are built from, so this must be bit-exact:
/// decomposition and canonical ordering both apply only inside the
/// decomposition range.
pub fn hfs_nfd(input: &str) -> String {
    let mut buf: Vec<char> = Vec::with_capacity(input.len());
    for c in input.chars() {
        if in_decomposition_range(c) {
            decompose_canonical(c, |d| buf.push(d));
        } else {
            buf.push(c);
        }
    }
    sort_combining_marks(&mut buf);
    buf.into_iter().collect()
}

/// Canonical ordering over runs of in-range combining marks. Any
/// out-of-range codepoint, and any starter, is a barrier that marks
/// never reorder across.
fn sort_combining_marks(buf: &mut [char]) {
    let sortable = |c: char| in_decomposition_range(c) && canonical_combining_class(c) > 0;
    let mut i = 0;
    while i < buf.len() {
        if !sortable(buf[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < buf.len() && sortable(buf[i]) {
            i += 1;
        }
        buf[start..i].sort_by_key(|&c| canonical_combining_class(c));
    }
}

/// Case-fold one UTF-16 unit for key comparison, or `None` for the
/// ignorable format characters. Transcribed from the TN1150 lower-case
/// table: rows the table leaves untouched fold to themselves, U+0000
/// orders last, and the fold target is the lower-case form.
fn fold_unit(u: u16) -> Option<u16> {
    let folded = match u {
        0x0000 => 0xFFFF,
        // Zero-width and directional format characters are ignorable.
        0x200C..=0x200F | 0x202A..=0x202E | 0x206A..=0x206F | 0xFEFF => return None,
        // Basic Latin and Latin-1 (multiplication sign and sharp s stay).
        0x0041..=0x005A => u + 0x20,
        0x00C0..=0x00D6 | 0x00D8..=0x00DE => u + 0x20,
        // Latin Extended-A pairs; dotted/dotless I are deliberately not
        // cross-folded.
        0x0100..=0x012F | 0x0132..=0x0137 if u & 1 == 0 => u + 1,
        0x0139..=0x0147 if u & 1 == 1 => u + 1,
        0x014A..=0x0177 if u & 1 == 0 => u + 1,
        0x0178 => 0x00FF,
        0x0179..=0x017D if u & 1 == 1 => u + 1,
        // Latin Extended-B, including the African letters whose lower
        // case lives in IPA Extensions.
        0x0181 => 0x0253,
        0x0182 | 0x0184 => u + 1,
        0x0186 => 0x0254,
        0x0187 => 0x0188,
        0x0189..=0x018A => u + 0xCD,
        0x018B => 0x018C,
        0x018E => 0x01DD,
        0x018F => 0x0259,
        0x0190 => 0x025B,
        0x0191 => 0x0192,
        0x0193 => 0x0260,
        0x0194 => 0x0263,
        0x0196 => 0x0269,
        0x0197 => 0x0268,
        0x0198 => 0x0199,
        0x019C => 0x026F,
        0x019D => 0x0272,
        0x019F => 0x0275,
        0x01A0 | 0x01A2 | 0x01A4 => u + 1,
        0x01A7 => 0x01A8,
        0x01A9 => 0x0283,
        0x01AC => 0x01AD,
        0x01AE => 0x0288,
        0x01AF => 0x01B0,
        0x01B1..=0x01B2 => u + 0xD9,
        0x01B3 | 0x01B5 => u + 1,
        0x01B7 => 0x0292,
        0x01B8 => 0x01B9,
        0x01BC => 0x01BD,
        // Digraphs: both the upper and title case forms fold to the
        // lower case third.
        0x01C4..=0x01C5 => 0x01C6,
        0x01C7..=0x01C8 => 0x01C9,
        0x01CA..=0x01CB => 0x01CC,
        0x01CD..=0x01DB if u & 1 == 1 => u + 1,
        0x01DE..=0x01EE if u & 1 == 0 => u + 1,
        0x01F1..=0x01F2 => 0x01F3,
        0x01F4 => 0x01F5,
        0x01FA..=0x0216 if u & 1 == 0 => u + 1,
        // Greek.
        0x0386 => 0x03AC,
        0x0388..=0x038A => u + 0x25,
        0x038C => 0x03CC,
        0x038E..=0x038F => u + 0x3F,
        0x0391..=0x03A1 | 0x03A3..=0x03AB => u + 0x20,
        0x03E2..=0x03EE if u & 1 == 0 => u + 1,
        // Cyrillic.
        0x0401..=0x040F => u + 0x50,
        0x0410..=0x042F => u + 0x20,
        0x0460..=0x0480 if u & 1 == 0 => u + 1,
        0x0490..=0x04BE if u & 1 == 0 => u + 1,
        0x04C1 | 0x04C3 | 0x04C7 | 0x04CB => u + 1,
        0x04D0..=0x04EA if u & 1 == 0 => u + 1,
        0x04EE..=0x04F4 if u & 1 == 0 => u + 1,
        0x04F8 => 0x04F9,
        // Armenian and Georgian.
        0x0531..=0x0556 => u + 0x30,
        0x10A0..=0x10C5 => u + 0x30,
        // Latin Extended Additional.
        0x1E00..=0x1E94 if u & 1 == 0 => u + 1,
        0x1EA0..=0x1EF8 if u & 1 == 0 => u + 1,
        // Greek Extended.
        0x1F08..=0x1F0F | 0x1F18..=0x1F1D | 0x1F28..=0x1F2F => u - 8,
        0x1F38..=0x1F3F | 0x1F48..=0x1F4D => u - 8,
        0x1F59 | 0x1F5B | 0x1F5D | 0x1F5F => u - 8,
        0x1F68..=0x1F6F | 0x1F88..=0x1F8F | 0x1F98..=0x1F9F | 0x1FA8..=0x1FAF => u - 8,
        0x1FB8..=0x1FB9 | 0x1FD8..=0x1FD9 | 0x1FE8..=0x1FE9 => u - 8,
        0x1FBA..=0x1FBB => u - 0x4A,
        0x1FBC => 0x1FB3,
        0x1FC8..=0x1FCB => u - 0x56,
        0x1FCC => 0x1FC3,
        0x1FDA..=0x1FDB => u - 0x64,
        0x1FEA..=0x1FEB => u - 0x70,
        0x1FEC => 0x1FE5,
        0x1FF8..=0x1FF9 => u - 0x80,
        0x1FFA..=0x1FFB => u - 0x7E,
        0x1FFC => 0x1FF3,
        // Number forms, enclosed alphanumerics, fullwidth forms.
        0x2160..=0x216F => u + 0x10,
        0x24B6..=0x24CF => u + 0x1A,
        0xFF21..=0xFF3A => u + 0x20,
        _ => u,
    };
    Some(folded)
}

/// TN1150 FastUnicodeCompare: the name order of case-insensitive
/// catalog keys. A string that runs out of units orders before any
/// surviving unit, and since real U+0000 folds to 0xFFFF, an embedded
/// null sorts a name after everything else under its parent.
pub fn fast_unicode_compare(a: &[u16], b: &[u16]) -> Ordering {
    let mut ia = a.iter().copied().filter_map(fold_unit);
    let mut ib = b.iter().copied().filter_map(fold_unit);
    loop {
        match (ia.next(), ib.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match x.cmp(&y) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

/// Name payload of a catalog key, ordered by the volume's comparison
/// rule. `HfsString` is the case-insensitive order of "H+" volumes;
/// `HfsStringBinary` the strict code-unit order of "HX".
pub trait HfsStringLike:
    fmt::Debug + fmt::Display + Ord + PartialOrd + Eq + PartialEq + Clone + Sized
{
    fn from_units(units: Vec<u16>) -> Self;
    fn units(&self) -> &[u16];
}

#[derive(Clone, PartialEq, Eq)]
pub struct HfsString(pub Vec<u16>);

#[derive(Clone, PartialEq, Eq)]
pub struct HfsStringBinary(pub Vec<u16>);

fn fmt_units(units: &[u16], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for part in char::decode_utf16(units.iter().copied()) {
        match part {
            Ok(c) => write!(f, "{}", c)?,
            Err(e) => write!(f, "\\u{{{:04X}}}", e.unpaired_surrogate())?,
        }
    }
    Ok(())
}

impl fmt::Debug for HfsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_units(&self.0, f)
    }
}

impl fmt::Display for HfsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_units(&self.0, f)
    }
}

impl PartialOrd for HfsString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HfsString {
    fn cmp(&self, other: &Self) -> Ordering {
        fast_unicode_compare(&self.0, &other.0)
    }
}

impl HfsStringLike for HfsString {
    fn from_units(units: Vec<u16>) -> Self {
        HfsString(units)
    }

    fn units(&self) -> &[u16] {
        &self.0
    }
}

impl fmt::Debug for HfsStringBinary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_units(&self.0, f)
    }
}

impl fmt::Display for HfsStringBinary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_units(&self.0, f)
    }
}

impl PartialOrd for HfsStringBinary {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HfsStringBinary {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl HfsStringLike for HfsStringBinary {
    fn from_units(units: Vec<u16>) -> Self {
        HfsStringBinary(units)
    }

    fn units(&self) -> &[u16] {
        &self.0
    }
}
