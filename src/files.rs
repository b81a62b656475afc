//! Redirection of script and asset paths from the game's `rld` directory to the translated
//! copies in `rld_chs`.
//!
//! The layout is fixed by the translation package:
//!
//! ```text
//! game\rld\script\001.txt        original
//! game\rld_chs\script\001.txt    preferred when it exists
//! ```

use widestring::{U16CStr, U16CString};

pub const MARKER: &str = "rld";
pub const ALTERNATE: &str = "rld_chs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    Unchanged,
    Redirected(U16CString),
}

fn is_separator(unit: u16) -> bool {
    unit == u16::from(b'\\') || unit == u16::from(b'/')
}

/// Finds the first path segment named exactly `MARKER` that is followed by more path.
/// Returns the index of the segment's first character.
fn find_marker(path: &[u16]) -> Option<usize> {
    let marker: Vec<u16> = MARKER.encode_utf16().collect();

    (0..path.len()).find(|&start| {
        let at_segment_start = start == 0 || is_separator(path[start - 1]);
        let end = start + marker.len();

        at_segment_start
            && path.get(start..end) == Some(&marker[..])
            && path.get(end).copied().map_or(false, is_separator)
    })
}

/// The path that would replace `path`, whether or not it exists.
///
/// ```
/// use exhibit_chs::files::candidate;
/// use widestring::U16CString;
///
/// let path = U16CString::from_str(r"game\rld\script\001.txt").unwrap();
/// let alternate = candidate(&path).unwrap();
///
/// assert_eq!(alternate.to_string_lossy(), r"game\rld_chs\script\001.txt");
/// assert!(candidate(&U16CString::from_str(r"game\world\map.dat").unwrap()).is_none());
/// ```
pub fn candidate(path: &U16CStr) -> Option<U16CString> {
    let units = path.as_slice();
    let start = find_marker(units)?;
    let rest = start + MARKER.encode_utf16().count();

    let mut redirected = Vec::with_capacity(units.len() + ALTERNATE.len());
    redirected.extend_from_slice(&units[..start]);
    redirected.extend(ALTERNATE.encode_utf16());
    redirected.extend_from_slice(&units[rest..]);

    U16CString::from_vec(redirected).ok()
}

/// Applies the redirection rule. `exists` is only consulted for paths inside `rld`, and the
/// original path is kept whenever the alternate cannot be confirmed.
pub fn redirect(path: &U16CStr, exists: impl Fn(&U16CStr) -> bool) -> Redirect {
    match candidate(path) {
        Some(alternate) if exists(&alternate) => Redirect::Redirected(alternate),
        _ => Redirect::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::path::PathBuf;

    fn wide(s: &str) -> U16CString {
        U16CString::from_str(s).unwrap()
    }

    #[test]
    fn redirects_when_translation_exists() {
        let path = wide(r"X:\game\rld\script\001.txt");

        let result = redirect(&path, |candidate| {
            candidate.to_string_lossy() == r"X:\game\rld_chs\script\001.txt"
        });

        assert_eq!(
            result,
            Redirect::Redirected(wide(r"X:\game\rld_chs\script\001.txt"))
        );
    }

    #[test]
    fn keeps_original_when_translation_missing() {
        let path = wide(r"X:\game\rld\script\001.txt");

        assert_eq!(redirect(&path, |_| false), Redirect::Unchanged);
    }

    #[test]
    fn unmarked_paths_are_not_probed() {
        let probed = Cell::new(false);

        for path in [
            r"X:\game\data\sound.wav",
            r"X:\game\world\map.dat",
            r"X:\game\rld_chs\script\001.txt",
            r"X:\game\rld",
        ] {
            let result = redirect(&wide(path), |_| {
                probed.set(true);
                true
            });

            assert_eq!(result, Redirect::Unchanged, "{path}");
        }

        assert!(!probed.get());
    }

    #[test]
    fn only_first_marker_is_replaced() {
        assert_eq!(
            candidate(&wide(r"rld\sub\rld\a.txt")),
            Some(wide(r"rld_chs\sub\rld\a.txt"))
        );
    }

    #[test]
    fn forward_slashes_are_segments_too() {
        assert_eq!(
            candidate(&wide("game/rld/a.txt")),
            Some(wide("game/rld_chs/a.txt"))
        );
    }

    #[test]
    fn probes_the_real_filesystem() {
        let root = tempfile::tempdir().unwrap();
        let original = root.path().join("rld").join("script").join("001.txt");
        let translated = root.path().join("rld_chs").join("script").join("001.txt");

        std::fs::create_dir_all(translated.parent().unwrap()).unwrap();
        std::fs::write(&translated, "translated").unwrap();

        let exists = |path: &U16CStr| PathBuf::from(path.to_string_lossy()).exists();
        let path = U16CString::from_os_str(original.as_os_str()).unwrap();

        match redirect(&path, exists) {
            Redirect::Redirected(alternate) => {
                assert_eq!(PathBuf::from(alternate.to_string_lossy()), translated)
            }
            Redirect::Unchanged => panic!("translation was not picked up"),
        }

        std::fs::remove_file(&translated).unwrap();
        assert_eq!(redirect(&path, exists), Redirect::Unchanged);
    }
}
