//! POSIX path canonicalization and prefix stripping (`spec.md` §4.B).
//!
//! Both operations are textual only — they never touch the filesystem, since
//! the paths they operate on describe the build sandbox, not this process's
//! filesystem.

/// Collapses redundant separators and resolves `.`/`..` segments without
/// touching the filesystem. Preserves a leading `//` (POSIX namespace
/// escape), strips trailing separators, and returns `"."` for an emptied
/// result.
pub fn canonicalize(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut s = 0usize;

    if s < bytes.len() && bytes[s] == b'/' {
        out.push(b'/');
        s += 1;
        if s < bytes.len() && bytes[s] == b'/' && !(s + 1 < bytes.len() && bytes[s + 1] == b'/') {
            // "//foo" namespace escape: keep exactly one extra slash.
            out.push(b'/');
            s += 1;
        }
        while s < bytes.len() && bytes[s] == b'/' {
            s += 1;
        }
    }
    let root_len = out.len();

    while s < bytes.len() {
        // At the start of a path segment.
        if bytes[s] == b'.' && (s + 1 == bytes.len() || bytes[s + 1] == b'/') {
            s += 1;
            while s < bytes.len() && bytes[s] == b'/' {
                s += 1;
            }
            continue;
        }

        if bytes[s] == b'.'
            && s + 1 < bytes.len()
            && bytes[s + 1] == b'.'
            && (s + 2 == bytes.len() || bytes[s + 2] == b'/')
        {
            // Try to pop the previous segment from `out`.
            let mut pre = out.len();
            while pre > root_len && out[pre - 1] == b'/' {
                pre -= 1;
            }
            if pre > root_len || (pre == root_len && root_len > 0) {
                let seg_end = pre;
                while pre > root_len && out[pre - 1] != b'/' {
                    pre -= 1;
                }
                let seg = &out[pre..seg_end];
                if seg == b".." {
                    out.push(b'.');
                    out.push(b'.');
                    s += 2;
                } else {
                    out.truncate(pre);
                    s += 2;
                    while s < bytes.len() && bytes[s] == b'/' {
                        s += 1;
                    }
                }
            } else {
                out.push(b'.');
                out.push(b'.');
                s += 2;
            }
        } else {
            while s < bytes.len() && bytes[s] != b'/' {
                out.push(bytes[s]);
                s += 1;
            }
        }

        if s < bytes.len() && bytes[s] == b'/' {
            out.push(b'/');
            s += 1;
            while s < bytes.len() && bytes[s] == b'/' {
                s += 1;
            }
        }
    }

    while out.len() > root_len && out[out.len() - 1] == b'/' {
        out.pop();
    }
    if out.is_empty() {
        out.push(b'.');
    }

    // SAFETY: every byte pushed above came from the input (valid UTF-8) or
    // is an ASCII '.' / '/' we pushed ourselves.
    String::from_utf8(out).expect("canonicalize only ever emits input bytes or ASCII")
}

/// Returns the remainder of `path` after `dir` if `path` begins with `dir`
/// followed by end-of-string or `/`, otherwise `None`. `dir` must not have a
/// trailing `/`. The returned remainder never starts with `/`.
pub fn skip_prefix<'a>(path: &'a str, dir: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(dir)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    Some(rest.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_redundant_separators() {
        assert_eq!(canonicalize("a//b///c"), "a/b/c");
    }

    #[test]
    fn resolves_dot_and_dotdot() {
        assert_eq!(canonicalize("/a/./b/../c"), "/a/c");
        assert_eq!(canonicalize("a/../../b"), "../b");
        assert_eq!(canonicalize("./a/b"), "a/b");
    }

    #[test]
    fn preserves_posix_namespace_escape() {
        assert_eq!(canonicalize("//foo/bar"), "//foo/bar");
        assert_eq!(canonicalize("///foo/bar"), "/foo/bar");
    }

    #[test]
    fn strips_trailing_separators() {
        assert_eq!(canonicalize("/a/b/"), "/a/b");
        assert_eq!(canonicalize("a/b//"), "a/b");
    }

    #[test]
    fn empty_result_is_dot() {
        assert_eq!(canonicalize(""), ".");
        assert_eq!(canonicalize("a/.."), ".");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        for p in ["/build/src/pkg", "a//b/../c/.", "//x", "../../a", ""] {
            let once = canonicalize(p);
            let twice = canonicalize(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn skip_prefix_basic() {
        assert_eq!(skip_prefix("/build/src/pkg/a.c", "/build/src"), Some("pkg/a.c"));
        assert_eq!(skip_prefix("/build/src", "/build/src"), Some(""));
        assert_eq!(skip_prefix("/build/srcish", "/build/src"), None);
        assert_eq!(skip_prefix("/other", "/build/src"), None);
    }

    #[test]
    fn skip_prefix_round_trips_with_tail() {
        for tail in ["a.c", "dir/a.c", ""] {
            let base = "/build/src";
            let path = if tail.is_empty() {
                base.to_string()
            } else {
                format!("{base}/{tail}")
            };
            assert_eq!(skip_prefix(&path, base), Some(tail));
        }
    }
}
