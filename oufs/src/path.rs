//! Turns a textual path into the inodes it names.

use crate::alloc::Unit;
use crate::dir;
use crate::error::{OufsError, Result};
use crate::io::BlockStorage;
use crate::layout::{InodeRef, MAX_NAME_LEN, N_INODES, ROOT_INODE, SEPARATOR};
use crate::master::MasterBlock;
use crate::node;

use log::{debug, warn};

/// Outcome of walking a path that did not hit an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The path names an existing inode. For `/` both references are the root
    /// and `name` is empty.
    Found {
        parent: InodeRef,
        child: InodeRef,
        name: String,
    },
    /// Only the last component is missing; `parent` is the directory that
    /// would hold it.
    Missing { parent: InodeRef, name: String },
    /// A component before the last one is missing, so there is no parent.
    Dangling { name: String },
}

impl Resolution {
    /// The inode the path names, if it exists.
    pub fn child(&self) -> Option<InodeRef> {
        match self {
            Resolution::Found { child, .. } => Some(*child),
            _ => None,
        }
    }

    /// The directory containing the named entry, if that directory exists.
    pub fn parent(&self) -> Option<InodeRef> {
        match self {
            Resolution::Found { parent, .. } | Resolution::Missing { parent, .. } => Some(*parent),
            Resolution::Dangling { .. } => None,
        }
    }

    /// The last component of the path.
    pub fn name(&self) -> &str {
        match self {
            Resolution::Found { name, .. }
            | Resolution::Missing { name, .. }
            | Resolution::Dangling { name } => name,
        }
    }
}

/// Makes `path` absolute by joining it to `cwd` unless it already starts at
/// the root.
pub fn absolute(cwd: &str, path: &str) -> String {
    if path.starts_with(SEPARATOR) {
        return path.to_string();
    }
    let cwd = cwd.trim_end_matches(SEPARATOR);
    let mut full = String::with_capacity(cwd.len() + path.len() + 1);
    if !cwd.is_empty() && !cwd.starts_with(SEPARATOR) {
        full.push(SEPARATOR);
    }
    full.push_str(cwd);
    full.push(SEPARATOR);
    full.push_str(path);
    full
}

/// Cuts a component down to what a directory entry can store.
pub fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Non-empty components of an absolute path, each truncated to the stored
/// name length.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR)
        .filter(|c| !c.is_empty())
        .map(truncate_name)
}

/// Walks `path` from the root, one directory lookup per component.
///
/// The walk reads the directory it is standing in before each lookup, so a
/// component that names a file can only be the last one. Anything after it
/// fails with `NotADirectory`; an unreadable inode fails with `Io`. An entry
/// whose inode is free in the master block counts as missing.
pub fn resolve<T: BlockStorage>(dev: &mut T, cwd: &str, path: &str) -> Result<Resolution> {
    let full = absolute(cwd, path);
    if full.contains('\0') {
        return Err(OufsError::InvalidArgument(format!(
            "{:?} contains a NUL byte",
            full
        )));
    }
    let master = MasterBlock::load(dev)?;
    let mut parts = components(&full).peekable();

    let mut parent = ROOT_INODE;
    let mut child = ROOT_INODE;
    let mut name = String::new();

    while let Some(part) = parts.next() {
        name.clear();
        name.push_str(part);

        let dir = node::read_inode(dev, child)?;
        if !dir.is_directory() {
            return Err(OufsError::NotADirectory(full.clone()));
        }

        let found = dir::find_entry(dev, &dir, part).filter(|&next| {
            // Refs past the table are left for the next read to reject.
            let live = next as usize >= N_INODES || master.is_allocated(Unit::Inode, next as usize);
            if !live {
                warn!("{}: {:?} refers to free inode {}", full, part, next);
            }
            live
        });
        match found {
            Some(next) => {
                parent = child;
                child = next;
            }
            None if parts.peek().is_some() => {
                debug!("{}: {:?} is missing and is not the last component", full, part);
                return Ok(Resolution::Dangling { name });
            }
            None => {
                debug!("{}: {:?} is missing from inode {}", full, part, child);
                return Ok(Resolution::Missing {
                    parent: child,
                    name,
                });
            }
        }
    }

    debug!("{}: found inode {} in inode {}", full, child, parent);
    Ok(Resolution::Found {
        parent,
        child,
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_are_kept_verbatim() {
        assert_eq!(absolute("/a", "/b/c"), "/b/c");
        assert_eq!(absolute("/a", "//b//"), "//b//");
    }

    #[test]
    fn relative_paths_are_joined_with_one_separator() {
        assert_eq!(absolute("/", "a/b"), "/a/b");
        assert_eq!(absolute("/a", "b"), "/a/b");
        assert_eq!(absolute("/a/", "b"), "/a/b");
        assert_eq!(absolute("", "b"), "/b");
        assert_eq!(absolute("a", "b"), "/a/b");
    }

    #[test]
    fn components_skip_empty_segments() {
        let parts: Vec<&str> = components("//a//b/").collect();
        assert_eq!(parts, vec!["a", "b"]);
        assert_eq!(components("/").count(), 0);
        assert_eq!(components("").count(), 0);
    }

    #[test]
    fn long_components_are_truncated() {
        let parts: Vec<&str> = components("/abcdefghijklmnop/x").collect();
        assert_eq!(parts, vec!["abcdefghijklm", "x"]);
    }

    #[test]
    fn truncation_respects_character_boundaries() {
        // Twelve ASCII bytes followed by a two byte character.
        let name = "abcdefghijklé";
        assert_eq!(truncate_name(name), "abcdefghijkl");
        assert_eq!(truncate_name("short"), "short");
    }

    #[test]
    fn resolution_accessors() {
        let found = Resolution::Found {
            parent: 0,
            child: 3,
            name: "x".to_string(),
        };
        assert_eq!(found.child(), Some(3));
        assert_eq!(found.parent(), Some(0));
        assert_eq!(found.name(), "x");

        let dangling = Resolution::Dangling {
            name: "y".to_string(),
        };
        assert_eq!(dangling.child(), None);
        assert_eq!(dangling.parent(), None);
    }
}
