//! Activity Definition Registry
//!
//! Links parsed modules into an immutable table of activity definitions. Each
//! module sees, in increasing priority:
//!
//! 1. builtin device primitives
//! 2. activities of the modules it imports (imports are not transitive)
//! 3. its own activities
//!
//! Linking resolves every `run` to a `CallTarget`, every variable to a slot
//! index, and checks call arity, so the interpreter never looks names up.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::stdlib::{is_builtin_name, primitives::Primitive};
use super::types::ast::{ActivityDecl, CallTarget, DefId, Expr, Module, Span, Stmt, VarRef};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("module '{0}' is defined more than once")]
    DuplicateModule(String),

    #[error("unknown module '{name}'")]
    UnknownModule {
        name: String,
        /// Importing module, `None` for the main module
        from: Option<String>,
    },

    #[error("activity '{name}' is defined more than once in module '{module}'")]
    DuplicateActivity { module: String, name: String },

    #[error("'{name}' is imported into '{module}' from both '{first}' and '{second}'")]
    NameCollision {
        module: String,
        name: String,
        first: String,
        second: String,
    },

    #[error("unknown activity '{name}' called from '{caller}'")]
    UnknownActivity {
        caller: String,
        name: String,
        span: Span,
    },

    #[error("'{name}' takes {expected_args} argument(s) and {expected_outs} location(s), called from '{caller}' with {got_args} and {got_outs}")]
    ArityMismatch {
        caller: String,
        name: String,
        expected_args: usize,
        got_args: usize,
        expected_outs: usize,
        got_outs: usize,
        span: Span,
    },

    #[error("undeclared variable '{name}' in '{activity}'")]
    UndeclaredVariable {
        activity: String,
        name: String,
        span: Span,
    },

    #[error("variable '{name}' is declared more than once in '{activity}'")]
    DuplicateVariable { activity: String, name: String },

    #[error("'{name}' cannot be bound as a location in '{activity}': it is not a variable")]
    LocationNotVariable {
        activity: String,
        name: String,
        span: Span,
    },

    #[error("module '{module}' has no activity '{entry}'")]
    MissingEntry { module: String, entry: String },

    #[error("entry activity '{entry}' must not take parameters")]
    EntryHasParameters { entry: String },
}

/// A linked activity definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDef {
    pub name: String,
    pub module: String,
    pub params: Vec<String>,
    pub outs: Vec<String>,
    /// Slot names: params, then outs, then locals in declaration order
    pub slots: Vec<String>,
    pub body: Stmt,
    pub span: Span,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ModuleEntry {
    doc: Option<String>,
    own: IndexMap<String, DefId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    defs: Vec<ActivityDef>,
    modules: IndexMap<String, ModuleEntry>,
    main_module: String,
    entry: DefId,
}

impl Registry {
    /// Link `modules` with `main_module.entry` as the root activity
    pub fn link(
        modules: Vec<Module>,
        main_module: &str,
        entry: &str,
    ) -> Result<Self, DefinitionError> {
        let mut table: IndexMap<String, ModuleEntry> = IndexMap::new();
        let mut decls: Vec<(String, Vec<String>, ActivityDecl)> = Vec::new();

        // Pass 1: register modules and their own activities
        for module in modules {
            if table.contains_key(&module.name) {
                return Err(DefinitionError::DuplicateModule(module.name));
            }
            let mut entry = ModuleEntry {
                doc: module.doc.clone(),
                own: IndexMap::new(),
            };
            let imports: Vec<String> = module.imports.iter().map(|i| i.module.clone()).collect();
            for decl in module.activities {
                if entry.own.contains_key(&decl.name) {
                    return Err(DefinitionError::DuplicateActivity {
                        module: module.name.clone(),
                        name: decl.name,
                    });
                }
                entry.own.insert(decl.name.clone(), decls.len());
                decls.push((module.name.clone(), imports.clone(), decl));
            }
            table.insert(module.name, entry);
        }

        let arities: Vec<(usize, usize)> = decls
            .iter()
            .map(|(_, _, d)| (d.params.len(), d.outs.len()))
            .collect();

        // Pass 2: resolve each definition against its module's namespace
        let mut namespaces: IndexMap<String, IndexMap<String, CallTarget>> = IndexMap::new();
        let mut defs = Vec::with_capacity(decls.len());
        for (module, imports, decl) in decls {
            if !namespaces.contains_key(&module) {
                let ns = namespace(&table, &module, &imports)?;
                namespaces.insert(module.clone(), ns);
            }
            defs.push(link_activity(decl, &module, &namespaces[&module], &arities)?);
        }

        let Some(main) = table.get(main_module) else {
            return Err(DefinitionError::UnknownModule {
                name: main_module.to_string(),
                from: None,
            });
        };
        let Some(&entry_id) = main.own.get(entry) else {
            return Err(DefinitionError::MissingEntry {
                module: main_module.to_string(),
                entry: entry.to_string(),
            });
        };
        let root = &defs[entry_id];
        if !root.params.is_empty() || !root.outs.is_empty() {
            return Err(DefinitionError::EntryHasParameters {
                entry: entry.to_string(),
            });
        }

        tracing::debug!(
            modules = table.len(),
            activities = defs.len(),
            main = main_module,
            "linked program"
        );

        Ok(Registry {
            defs,
            modules: table,
            main_module: main_module.to_string(),
            entry: entry_id,
        })
    }

    pub fn def(&self, id: DefId) -> Option<&ActivityDef> {
        self.defs.get(id)
    }

    pub fn entry(&self) -> DefId {
        self.entry
    }

    pub fn main_module(&self) -> &str {
        &self.main_module
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Own activity `name` of `module`
    pub fn find(&self, module: &str, name: &str) -> Option<DefId> {
        self.modules.get(module)?.own.get(name).copied()
    }

    /// Module docs of the main module
    pub fn explanation(&self) -> Option<&str> {
        self.modules.get(&self.main_module)?.doc.as_deref()
    }
}

/* ===================== Namespaces ===================== */

fn namespace(
    table: &IndexMap<String, ModuleEntry>,
    module: &str,
    imports: &[String],
) -> Result<IndexMap<String, CallTarget>, DefinitionError> {
    let mut ns: IndexMap<String, CallTarget> = Primitive::ALL
        .into_iter()
        .map(|p| (p.name().to_string(), CallTarget::Primitive { primitive: p }))
        .collect();

    let mut origin: IndexMap<String, String> = IndexMap::new();
    for import in imports {
        if import == module || origin.values().any(|m| m == import) {
            continue;
        }
        let entry = table.get(import).ok_or_else(|| DefinitionError::UnknownModule {
            name: import.clone(),
            from: Some(module.to_string()),
        })?;
        for (name, &def) in &entry.own {
            if let Some(first) = origin.get(name) {
                return Err(DefinitionError::NameCollision {
                    module: module.to_string(),
                    name: name.clone(),
                    first: first.clone(),
                    second: import.clone(),
                });
            }
            origin.insert(name.clone(), import.clone());
            ns.insert(name.clone(), CallTarget::Activity { def });
        }
    }

    if let Some(entry) = table.get(module) {
        for (name, &def) in &entry.own {
            ns.insert(name.clone(), CallTarget::Activity { def });
        }
    }
    Ok(ns)
}

/* ===================== Activity Linking ===================== */

fn link_activity(
    decl: ActivityDecl,
    module: &str,
    ns: &IndexMap<String, CallTarget>,
    arities: &[(usize, usize)],
) -> Result<ActivityDef, DefinitionError> {
    let mut names: Vec<String> = decl.params.iter().chain(&decl.outs).cloned().collect();
    collect_vars(&decl.body, &mut names);

    let mut slots = IndexMap::new();
    for name in &names {
        if slots.insert(name.clone(), slots.len() as u32).is_some() {
            return Err(DefinitionError::DuplicateVariable {
                activity: decl.name.clone(),
                name: name.clone(),
            });
        }
    }

    let mut body = decl.body;
    let linker = Linker {
        activity: &decl.name,
        ns,
        arities,
        slots: &slots,
    };
    linker.stmt(&mut body)?;

    Ok(ActivityDef {
        name: decl.name,
        module: module.to_string(),
        params: decl.params,
        outs: decl.outs,
        slots: names,
        body,
        span: decl.span,
    })
}

/// Names declared with `var`, in source order
fn collect_vars(stmt: &Stmt, out: &mut Vec<String>) {
    match stmt {
        Stmt::Var { name, .. } => out.push(name.clone()),
        Stmt::Block { body, .. } | Stmt::Exec { body, .. } => {
            body.iter().for_each(|s| collect_vars(s, out))
        }
        Stmt::Repeat { body, .. }
        | Stmt::While { body, .. }
        | Stmt::Every { body, .. }
        | Stmt::When { body, .. }
        | Stmt::Defer { body, .. } => collect_vars(body, out),
        Stmt::If { then_s, else_s, .. } => {
            collect_vars(then_s, out);
            if let Some(e) = else_s {
                collect_vars(e, out);
            }
        }
        Stmt::Cobegin { trails, .. } => trails.iter().for_each(|t| collect_vars(&t.body, out)),
        Stmt::Assign { .. }
        | Stmt::Expr { .. }
        | Stmt::Run { .. }
        | Stmt::Await { .. }
        | Stmt::Halt { .. }
        | Stmt::Return { .. } => {}
    }
}

struct Linker<'a> {
    activity: &'a str,
    ns: &'a IndexMap<String, CallTarget>,
    arities: &'a [(usize, usize)],
    slots: &'a IndexMap<String, u32>,
}

impl Linker<'_> {
    fn stmt(&self, stmt: &mut Stmt) -> Result<(), DefinitionError> {
        match stmt {
            Stmt::Block { body, .. } | Stmt::Exec { body, .. } => {
                body.iter_mut().try_for_each(|s| self.stmt(s))
            }
            Stmt::Var {
                name, slot, init, ..
            } => {
                *slot = self.slots.get(name.as_str()).copied();
                match init {
                    Some(e) => self.expr(e),
                    None => Ok(()),
                }
            }
            Stmt::Assign { var, value, .. } => {
                self.var_ref(var)?;
                self.expr(value)
            }
            Stmt::Expr { expr, .. } => self.expr(expr),
            Stmt::Run {
                activity,
                args,
                outs,
                bind,
                target,
                span,
            } => {
                let resolved = self.ns.get(activity.as_str()).copied().ok_or_else(|| {
                    DefinitionError::UnknownActivity {
                        caller: self.activity.to_string(),
                        name: activity.clone(),
                        span: *span,
                    }
                })?;
                let (expected_args, expected_outs) = match resolved {
                    CallTarget::Activity { def } => self.arities[def],
                    CallTarget::Primitive { primitive } => primitive.arity(),
                };
                if args.len() != expected_args || outs.len() != expected_outs {
                    return Err(DefinitionError::ArityMismatch {
                        caller: self.activity.to_string(),
                        name: activity.clone(),
                        expected_args,
                        got_args: args.len(),
                        expected_outs,
                        got_outs: outs.len(),
                        span: *span,
                    });
                }
                *target = Some(resolved);
                args.iter_mut().try_for_each(|a| self.expr(a))?;
                outs.iter_mut().try_for_each(|o| self.var_ref(o))?;
                match bind {
                    Some(b) => self.var_ref(b),
                    None => Ok(()),
                }
            }
            Stmt::Await { test, .. } => self.expr(test),
            Stmt::Halt { .. } => Ok(()),
            Stmt::Repeat { body, until, .. } => {
                self.stmt(body)?;
                match until {
                    Some(e) => self.expr(e),
                    None => Ok(()),
                }
            }
            Stmt::While { test, body, .. }
            | Stmt::Every { test, body, .. }
            | Stmt::When { test, body, .. } => {
                self.expr(test)?;
                self.stmt(body)
            }
            Stmt::If {
                test,
                then_s,
                else_s,
                ..
            } => {
                self.expr(test)?;
                self.stmt(then_s)?;
                match else_s {
                    Some(e) => self.stmt(e),
                    None => Ok(()),
                }
            }
            Stmt::Cobegin { trails, .. } => {
                trails.iter_mut().try_for_each(|t| self.stmt(&mut t.body))
            }
            Stmt::Defer { body, .. } => self.stmt(body),
            Stmt::Return { value, .. } => match value {
                Some(e) => self.expr(e),
                None => Ok(()),
            },
        }
    }

    fn expr(&self, expr: &mut Expr) -> Result<(), DefinitionError> {
        match expr {
            Expr::LitBool { .. } | Expr::LitNum { .. } | Expr::LitStr { .. } | Expr::LitNull { .. } => {
                Ok(())
            }
            Expr::LitList { elements, .. } => elements.iter_mut().try_for_each(|e| self.expr(e)),
            Expr::Ident { name, slot, span } => {
                *slot = self.slots.get(name.as_str()).copied();
                if slot.is_none() && !is_builtin_name(name) {
                    return Err(DefinitionError::UndeclaredVariable {
                        activity: self.activity.to_string(),
                        name: name.clone(),
                        span: *span,
                    });
                }
                Ok(())
            }
            Expr::Member { object, .. } => self.expr(object),
            Expr::Call { callee, args, .. } => {
                // Callees name functions, never slots
                if !matches!(**callee, Expr::Ident { .. }) {
                    self.expr(callee)?;
                }
                args.iter_mut().try_for_each(|a| self.expr(a))
            }
            Expr::BinaryOp { left, right, .. } => {
                self.expr(left)?;
                self.expr(right)
            }
        }
    }

    fn var_ref(&self, var: &mut VarRef) -> Result<(), DefinitionError> {
        match self.slots.get(var.name.as_str()) {
            Some(&slot) => {
                var.slot = Some(slot);
                Ok(())
            }
            None if is_builtin_name(&var.name) => Err(DefinitionError::LocationNotVariable {
                activity: self.activity.to_string(),
                name: var.name.clone(),
                span: var.span,
            }),
            None => Err(DefinitionError::UndeclaredVariable {
                activity: self.activity.to_string(),
                name: var.name.clone(),
                span: var.span,
            }),
        }
    }
}
