//! Declarative build plans.
//!
//! A plan is a TOML file listing file operations in the order they should
//! run. The `apply` command executes one plan inside one
//! [`BuildTransaction`].
//!
//! ```toml
//! [settings]
//! dir_sync = "best-effort"   # strict | best-effort | skip
//!
//! [[op]]
//! kind = "mkdir"
//! path = "public"
//!
//! [[op]]
//! kind = "write"
//! path = "public/menu.json"
//! content = '{"items": []}'
//!
//! [[op]]
//! kind = "copy"
//! from = "assets/logo.png"
//! to = "public/logo.png"
//!
//! [[op]]
//! kind = "remove"
//! path = "public/old.html"
//!
//! [[op]]
//! kind = "publish"           # stage a copy of `source`, swap it in on commit
//! source = "build/site"
//! target = "public/site"
//! ```
//!
//! Relative paths resolve against the plan's root directory.

use crate::error::{BuildError, Result};
use crate::fs::{BuildTransaction, DirSync, StagedDirectory};

use std::fs;
use std::path::{Path, PathBuf};
use toml_edit::{DocumentMut, Item, Table};

/// One step of a build plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOp {
    Write { path: PathBuf, content: String },
    Copy { from: PathBuf, to: PathBuf },
    Mkdir { path: PathBuf },
    Remove { path: PathBuf },
    Publish { source: PathBuf, target: PathBuf },
}

impl PlanOp {
    /// Paths this step creates, replaces, or deletes.
    pub fn written_path(&self) -> &Path {
        match self {
            PlanOp::Write { path, .. } | PlanOp::Mkdir { path } | PlanOp::Remove { path } => path,
            PlanOp::Copy { to, .. } => to,
            PlanOp::Publish { target, .. } => target,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            PlanOp::Write { path, content } => {
                format!("Write: {} ({} bytes)", path.display(), content.len())
            }
            PlanOp::Copy { from, to } => format!("Copy: {} → {}", from.display(), to.display()),
            PlanOp::Mkdir { path } => format!("Create: {}/", path.display()),
            PlanOp::Remove { path } => format!("Remove: {}", path.display()),
            PlanOp::Publish { source, target } => {
                format!("Publish: {} → {}", source.display(), target.display())
            }
        }
    }
}

/// A parsed build plan.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub root: PathBuf,
    pub dir_sync: Option<DirSync>,
    pub ops: Vec<PlanOp>,
}

impl BuildPlan {
    /// Reads a plan file. `root` defaults to the plan's directory.
    pub fn load(plan_path: &Path, root: Option<&Path>) -> Result<Self> {
        let content = fs::read_to_string(plan_path).map_err(|e| {
            log::error!("Failed to read {}: {}", plan_path.display(), e);
            BuildError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read {}: {}", plan_path.display(), e),
            ))
        })?;

        let root = match root {
            Some(root) => root.to_path_buf(),
            None => match plan_path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            },
        };

        Self::parse(&content, root)
    }

    pub fn parse(content: &str, root: PathBuf) -> Result<Self> {
        let doc: DocumentMut = content.parse()?;

        let dir_sync = match doc.get("settings").and_then(|s| s.get("dir_sync")) {
            None => None,
            Some(item) => {
                let name = item.as_str().ok_or_else(|| {
                    BuildError::InvalidPlan("settings.dir_sync must be a string".to_string())
                })?;
                Some(DirSync::parse(name).ok_or_else(|| {
                    BuildError::InvalidPlan(format!(
                        "unknown dir_sync '{}' (expected strict, best-effort or skip)",
                        name
                    ))
                })?)
            }
        };

        let mut ops = Vec::new();
        if let Some(item) = doc.get("op") {
            let tables = item.as_array_of_tables().ok_or_else(|| {
                BuildError::InvalidPlan("'op' must be an array of tables ([[op]])".to_string())
            })?;
            for (idx, table) in tables.iter().enumerate() {
                ops.push(parse_op(idx + 1, table)?);
            }
        }

        log::debug!("Parsed plan with {} operations", ops.len());
        Ok(Self {
            root,
            dir_sync,
            ops,
        })
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns human-readable preview of the plan.
    pub fn preview(&self) -> Vec<String> {
        self.ops.iter().map(PlanOp::describe).collect()
    }

    /// Issues every step against `txn`, in order.
    pub fn apply(&self, txn: &mut BuildTransaction) -> Result<()> {
        for op in &self.ops {
            log::debug!("{}", op.describe());
            match op {
                PlanOp::Write { path, content } => txn.write_file(self.resolve(path), content)?,
                PlanOp::Copy { from, to } => {
                    txn.copy_file(self.resolve(from), self.resolve(to))?
                }
                PlanOp::Mkdir { path } => txn.create_directory(self.resolve(path))?,
                PlanOp::Remove { path } => txn.remove_file(self.resolve(path))?,
                PlanOp::Publish { source, target } => {
                    let source = self.resolve(source);
                    let staged = txn.create_staged_directory(self.resolve(target))?;
                    stage_tree(&source, staged)?;
                }
            }
        }
        Ok(())
    }
}

fn parse_op(idx: usize, table: &Table) -> Result<PlanOp> {
    let kind = str_field(idx, table, "kind")?;
    let path = |key: &str| str_field(idx, table, key).map(PathBuf::from);

    match kind {
        "write" => Ok(PlanOp::Write {
            path: path("path")?,
            content: str_field(idx, table, "content")?.to_string(),
        }),
        "copy" => Ok(PlanOp::Copy {
            from: path("from")?,
            to: path("to")?,
        }),
        "mkdir" => Ok(PlanOp::Mkdir { path: path("path")? }),
        "remove" => Ok(PlanOp::Remove { path: path("path")? }),
        "publish" => Ok(PlanOp::Publish {
            source: path("source")?,
            target: path("target")?,
        }),
        other => Err(BuildError::InvalidPlan(format!(
            "op #{}: unknown kind '{}'",
            idx, other
        ))),
    }
}

fn str_field<'a>(idx: usize, table: &'a Table, key: &str) -> Result<&'a str> {
    table.get(key).and_then(Item::as_str).ok_or_else(|| {
        BuildError::InvalidPlan(format!("op #{}: missing string field '{}'", idx, key))
    })
}

/// Copies the tree under `source` into a staged directory.
fn stage_tree(source: &Path, staged: &mut StagedDirectory) -> Result<()> {
    let walker = ignore::WalkBuilder::new(source)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    for entry in walker {
        let entry = entry.map_err(|e| BuildError::Other(e.into()))?;
        if entry.depth() == 0 {
            continue;
        }

        let path = entry.path();
        let relative = path
            .strip_prefix(source)
            .map_err(|e| BuildError::Other(e.into()))?;

        match entry.file_type() {
            Some(ft) if ft.is_dir() => {
                staged.create_directory(relative)?;
            }
            Some(ft) if ft.is_file() => {
                staged.copy_file(path, relative)?;
            }
            _ => log::warn!("Skipping non-regular file: {}", path.display()),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PLAN: &str = r#"
[settings]
dir_sync = "strict"

[[op]]
kind = "mkdir"
path = "public"

[[op]]
kind = "write"
path = "public/menu.json"
content = '{"items": []}'

[[op]]
kind = "copy"
from = "assets/logo.png"
to = "public/logo.png"

[[op]]
kind = "publish"
source = "build/site"
target = "public/site"
"#;

    #[test]
    fn test_parse_plan_in_order() {
        let plan = BuildPlan::parse(PLAN, PathBuf::from("/srv")).unwrap();

        assert_eq!(plan.dir_sync, Some(DirSync::Strict));
        assert_eq!(plan.ops.len(), 4);
        assert_eq!(
            plan.ops[0],
            PlanOp::Mkdir {
                path: PathBuf::from("public")
            }
        );
        assert_eq!(
            plan.ops[1],
            PlanOp::Write {
                path: PathBuf::from("public/menu.json"),
                content: r#"{"items": []}"#.to_string()
            }
        );
        assert_eq!(plan.resolve(Path::new("public")), PathBuf::from("/srv/public"));
    }

    #[test]
    fn test_parse_empty_plan() {
        let plan = BuildPlan::parse("", PathBuf::from(".")).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.dir_sync, None);
    }

    #[test]
    fn test_parse_errors() {
        let root = PathBuf::from(".");

        let unknown = "[[op]]\nkind = \"chmod\"\npath = \"x\"\n";
        assert!(matches!(
            BuildPlan::parse(unknown, root.clone()),
            Err(BuildError::InvalidPlan(msg)) if msg.contains("chmod")
        ));

        let missing = "[[op]]\nkind = \"write\"\npath = \"x\"\n";
        assert!(matches!(
            BuildPlan::parse(missing, root.clone()),
            Err(BuildError::InvalidPlan(msg)) if msg.contains("content")
        ));

        let bad_sync = "[settings]\ndir_sync = \"sometimes\"\n";
        assert!(BuildPlan::parse(bad_sync, root.clone()).is_err());

        let not_array = "op = 3\n";
        assert!(BuildPlan::parse(not_array, root.clone()).is_err());

        assert!(matches!(
            BuildPlan::parse("[[op]\n", root),
            Err(BuildError::Toml(_))
        ));
    }

    #[test]
    fn test_apply_plan() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("assets")).unwrap();
        fs::write(root.join("assets/logo.png"), "png").unwrap();
        fs::create_dir_all(root.join("build/site/css")).unwrap();
        fs::write(root.join("build/site/index.html"), "<h1>Menu</h1>").unwrap();
        fs::write(root.join("build/site/css/theme.css"), "body{}").unwrap();

        let plan = BuildPlan::parse(PLAN, root.to_path_buf()).unwrap();
        let mut txn = BuildTransaction::new();
        plan.apply(&mut txn).unwrap();
        txn.commit().unwrap();

        assert_eq!(
            fs::read_to_string(root.join("public/menu.json")).unwrap(),
            r#"{"items": []}"#
        );
        assert_eq!(fs::read_to_string(root.join("public/logo.png")).unwrap(), "png");
        assert_eq!(
            fs::read_to_string(root.join("public/site/css/theme.css")).unwrap(),
            "body{}"
        );

        let staged = &txn.staged_directories()[0];
        assert_eq!(staged.operations().len(), 3);
    }

    #[test]
    fn test_preview_lists_every_step() {
        let plan = BuildPlan::parse(PLAN, PathBuf::from(".")).unwrap();
        let preview = plan.preview();

        assert_eq!(preview.len(), 4);
        assert_eq!(preview[0], "Create: public/");
        assert!(preview[3].starts_with("Publish: build/site"));
    }
}
