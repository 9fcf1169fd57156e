//! Source positions, and their resolution from debug metadata.
//!
//! The "current position" while lowering a routine is threaded explicitly: [`advance`] takes the
//! cursor and a statement and hands back the cursor to use for that statement (and for following
//! statements, until another resolvable location appears).

use crate::ir::{MetadataNode, MetadataRef, MetadataTable, Stmt};
use crate::log::*;
use std::rc::Rc;

/// Maximum number of scope links followed while resolving the file of a scope. Metadata may be
/// malformed or cyclic.
pub const SCOPE_WALK_DEPTH_BOUND: usize = 64;

/// Where a target statement came from.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Position {
    /// Generated by the translator, or before any source location has been seen
    Internal,
    Source {
        file: Rc<str>,
        line: u32,
        column: u32,
    },
}

impl Default for Position {
    fn default() -> Self {
        Position::Internal
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Position::Internal => write!(f, "<internal>"),
            Position::Source { file, line, column } => write!(f, "{}:{}:{}", file, line, column),
        }
    }
}

impl std::fmt::Debug for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

/// The position of `stmt`, given the position `cursor` in effect before it. If the statement has
/// no resolvable location, the cursor carries forward unchanged.
pub fn advance(cursor: Position, stmt: &Stmt, metadata: &MetadataTable) -> Position {
    stmt.debug_location()
        .and_then(|loc| resolve_location(metadata, loc))
        .unwrap_or(cursor)
}

/// Resolve a `DILocation` reference to a source position.
pub fn resolve_location(metadata: &MetadataTable, loc: MetadataRef) -> Option<Position> {
    match metadata.get(loc)? {
        MetadataNode::Location {
            line,
            column,
            scope,
            ..
        } => {
            let file = resolve_file(metadata, *scope)?;
            Some(Position::Source {
                file,
                line: *line,
                column: *column,
            })
        }
        other => {
            trace!("Ignoring non-location debug attachment"; "md" => %loc, "node" => ?other);
            None
        }
    }
}

/// Resolve the file name of a scope by walking outwards through enclosing scopes until a node that
/// names a file is found. Each step follows one link: the node's own file if it names one, else its
/// enclosing scope. At most [`SCOPE_WALK_DEPTH_BOUND`] links are followed.
pub fn resolve_file(metadata: &MetadataTable, scope: MetadataRef) -> Option<Rc<str>> {
    let mut current = scope;
    for _ in 0..SCOPE_WALK_DEPTH_BOUND {
        current = match metadata.get(current)? {
            MetadataNode::File {
                filename,
                directory,
            } => return Some(file_path(directory, filename)),
            MetadataNode::LexicalBlockFile { file, .. } => *file,
            MetadataNode::LexicalBlock { scope, file, .. } => file.unwrap_or(*scope),
            MetadataNode::Subprogram { file, scope, .. } => (*file).or(*scope)?,
            _ => return None,
        };
    }
    debug!("Scope walk exceeded depth bound; giving up"; "scope" => %scope);
    None
}

fn file_path(directory: &str, filename: &str) -> Rc<str> {
    if directory.is_empty() || filename.starts_with('/') {
        filename.into()
    } else {
        format!("{}/{}", directory.trim_end_matches('/'), filename).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Instr;

    fn table(nodes: Vec<(u32, MetadataNode)>) -> MetadataTable {
        let mut t = MetadataTable::new();
        for (i, n) in nodes {
            t.insert(MetadataRef(i), n);
        }
        t
    }

    #[test]
    fn nested_lexical_blocks_resolve_to_enclosing_file() {
        let md = table(vec![
            (
                1,
                MetadataNode::File {
                    filename: "main.c".into(),
                    directory: "/src".into(),
                },
            ),
            (
                2,
                MetadataNode::Subprogram {
                    name: "main".into(),
                    scope: None,
                    file: Some(MetadataRef(1)),
                    line: 1,
                },
            ),
            (
                3,
                MetadataNode::LexicalBlock {
                    scope: MetadataRef(2),
                    file: None,
                    line: 2,
                    column: 3,
                },
            ),
            (
                4,
                MetadataNode::LexicalBlock {
                    scope: MetadataRef(3),
                    file: None,
                    line: 3,
                    column: 5,
                },
            ),
            (
                5,
                MetadataNode::Location {
                    line: 4,
                    column: 9,
                    scope: MetadataRef(4),
                    inlined_at: None,
                },
            ),
        ]);
        assert_eq!(
            resolve_location(&md, MetadataRef(5)),
            Some(Position::Source {
                file: "/src/main.c".into(),
                line: 4,
                column: 9
            })
        );
    }

    #[test]
    fn lexical_block_file_overrides_enclosing_file() {
        let md = table(vec![
            (
                1,
                MetadataNode::File {
                    filename: "main.c".into(),
                    directory: "".into(),
                },
            ),
            (
                2,
                MetadataNode::File {
                    filename: "inc.h".into(),
                    directory: "".into(),
                },
            ),
            (
                3,
                MetadataNode::Subprogram {
                    name: "f".into(),
                    scope: Some(MetadataRef(1)),
                    file: Some(MetadataRef(1)),
                    line: 1,
                },
            ),
            (
                4,
                MetadataNode::LexicalBlockFile {
                    scope: MetadataRef(3),
                    file: MetadataRef(2),
                },
            ),
        ]);
        assert_eq!(resolve_file(&md, MetadataRef(4)).as_deref(), Some("inc.h"));
    }

    #[test]
    fn cyclic_scopes_terminate() {
        let md = table(vec![
            (
                1,
                MetadataNode::LexicalBlock {
                    scope: MetadataRef(2),
                    file: None,
                    line: 0,
                    column: 0,
                },
            ),
            (
                2,
                MetadataNode::LexicalBlock {
                    scope: MetadataRef(1),
                    file: None,
                    line: 0,
                    column: 0,
                },
            ),
        ]);
        assert_eq!(resolve_file(&md, MetadataRef(1)), None);
    }

    #[test]
    fn self_referential_scope_and_file_terminate_promptly() {
        let md = table(vec![(
            1,
            MetadataNode::LexicalBlock {
                scope: MetadataRef(1),
                file: Some(MetadataRef(1)),
                line: 0,
                column: 0,
            },
        )]);
        let started = std::time::Instant::now();
        assert_eq!(resolve_file(&md, MetadataRef(1)), None);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn self_referential_scope_read_from_text_keeps_cursor() {
        let module = crate::ir_reader::read_module(
            "define void @f() {\nentry:\n  ret void, !dbg !2\n}\n\n\
             !1 = distinct !DILexicalBlock(scope: !1, file: !1, line: 1, column: 1)\n\
             !2 = !DILocation(line: 3, column: 1, scope: !1)\n",
        )
        .unwrap();
        let stmt = &module.definitions[0].blocks[0].stmts[0];
        assert_eq!(
            advance(Position::Internal, stmt, &module.metadata),
            Position::Internal
        );
    }

    #[test]
    fn unresolvable_location_keeps_cursor() {
        let md = table(vec![]);
        let cursor = Position::Source {
            file: "a.c".into(),
            line: 7,
            column: 1,
        };
        let stmt = Stmt::effect(Instr::Unreachable).with_attachment("dbg", MetadataRef(99));
        assert_eq!(advance(cursor.clone(), &stmt, &md), cursor);
    }
}
