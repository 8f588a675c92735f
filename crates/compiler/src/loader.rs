//! Library loading
//!
//! Resolves a root URI and the transitive import/part graph into library
//! elements with populated scopes. Libraries are cached under their
//! canonical name, so circular imports terminate. Every library
//! implicitly imports `mica:core`, and `mica:*` libraries additionally
//! import `mica:system`; both require a configured library root and are
//! skipped without one (builtin classes are then synthesized on demand).

use crate::ast::{Node, NodeId, Owner};
use crate::compiler::{Compiler, LibraryElement};
use crate::error::{ErrorKind, Result};
use crate::scope::{ScopeEntry, ScopeId};
use crate::source::Location;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolve `relative` against the file `base` the way imports do: the
/// path replaces the final segment of the base.
pub fn uri_resolve(base: &Path, relative: &str) -> PathBuf {
    let relative = Path::new(relative);
    if relative.is_absolute() {
        return relative.to_path_buf();
    }
    match base.parent() {
        Some(parent) => parent.join(relative),
        None => relative.to_path_buf(),
    }
}

impl<'z> Compiler<'z> {
    /// Load (or fetch) the library registered under `library_name`.
    pub fn load_library(&mut self, library_name: &str, source_uri: &Path) -> Result<usize> {
        let name_id = self.builder.canonical_id(library_name);
        if let Some(existing) = self.library_map.lookup(name_id) {
            return Ok(*existing);
        }
        debug!(library = library_name, uri = %source_uri.display(), "load library");

        let library = self.build_library(source_uri)?;

        let outer_scope = self.scopes.new_scope(None);
        let library_scope = self.build_library_scope(library, outer_scope)?;
        let Node::Library { scope, .. } = self.builder.node_mut(library) else {
            unreachable!("expected library");
        };
        *scope = Some(library_scope);

        // Register before touching imports so circular imports resolve.
        let element_index = self.libraries.len();
        self.libraries.push(LibraryElement {
            library,
            outer_scope,
        });
        self.library_map.add(name_id, element_index);

        if let Some(library_root) = self.options().library_root.clone() {
            if library_name != "mica:core" {
                let core_uri = library_root.join("core/core.mica");
                let core = self.load_library("mica:core", &core_uri)?;
                self.add_import_of(element_index, core);
            }
            if library_name.starts_with("mica:") && library_name != "mica:system" {
                let system_uri = library_root.join("system/system.mica");
                let system = self.load_library("mica:system", &system_uri)?;
                self.add_import_of(element_index, system);
            }
        }

        let unit = match self.builder.node(library) {
            Node::Library { unit, .. } => *unit,
            _ => unreachable!(),
        };
        let declarations = match self.builder.node(unit) {
            Node::CompilationUnit { declarations } => declarations.clone(),
            _ => unreachable!("library holds unit"),
        };
        for declaration in declarations {
            let Node::Import { uri, prefix } = self.builder.node(declaration).clone() else {
                continue;
            };
            let import_path = match self.builder.node(uri) {
                Node::LiteralString(value) => value.clone(),
                _ => unreachable!("import uri is a string"),
            };
            let imported = if let Some(rest) = import_path.strip_prefix("mica:") {
                let Some(library_root) = self.options().library_root.clone() else {
                    return Err(self.error(
                        ErrorKind::Load,
                        Location::invalid(),
                        format!("Cannot import '{import_path}' without a library root"),
                    ));
                };
                let sub_path = library_root.join(format!("{rest}/{rest}.mica"));
                self.load_library(&import_path, &sub_path)?
            } else if let Some(rest) = import_path.strip_prefix("package:") {
                let Some(package_root) = self.options().package_root.clone() else {
                    return Err(self.error(
                        ErrorKind::Load,
                        Location::invalid(),
                        format!("Cannot import '{import_path}' without a package root"),
                    ));
                };
                let import_uri = package_root.join(rest);
                self.load_library(&import_uri.to_string_lossy(), &import_uri)?
            } else {
                let import_uri = uri_resolve(source_uri, &import_path);
                self.load_library(&import_uri.to_string_lossy(), &import_uri)?
            };
            match prefix {
                Some(prefix) => self.add_prefixed_import_of(element_index, imported, prefix),
                None => self.add_import_of(element_index, imported),
            }
        }
        Ok(element_index)
    }

    /// A library that has already been loaded, by canonical name.
    pub fn fetch_library(&mut self, name: &str) -> Option<usize> {
        let name_id = self.builder.canonical_id(name);
        self.library_map.lookup(name_id).copied()
    }

    /// Copy the imported library's declarations into the importer's
    /// outer scope; existing declarations win.
    pub fn add_import_of(&mut self, importer: usize, imported: usize) {
        let into = self.libraries[importer].outer_scope;
        let from = self.library_scope(self.libraries[imported].library);
        self.scopes.add_all(into, from);
    }

    fn add_prefixed_import_of(&mut self, importer: usize, imported: usize, prefix: NodeId) {
        let into = self.libraries[importer].outer_scope;
        let prefix_id = self.builder.identifier_id(prefix);
        let library = self.libraries[imported].library;
        self.scopes.add(
            into,
            prefix_id,
            ScopeEntry::Library {
                name: prefix_id,
                library,
            },
        );
    }

    /// Parse the root compilation unit and all its parts.
    fn build_library(&mut self, source_uri: &Path) -> Result<NodeId> {
        let location = self.builder.source_mut().load_file(source_uri);
        if location.is_invalid() {
            return Err(self.error(
                ErrorKind::Load,
                Location::invalid(),
                format!("Cannot open '{}'", source_uri.display()),
            ));
        }
        let unit = self.builder.build_unit(location)?;

        let declarations = match self.builder.node(unit) {
            Node::CompilationUnit { declarations } => declarations.clone(),
            _ => unreachable!("expected unit"),
        };
        let mut parts = Vec::new();
        for declaration in declarations {
            let Node::Part { uri } = self.builder.node(declaration) else {
                continue;
            };
            let part_path = match self.builder.node(*uri) {
                Node::LiteralString(value) => value.clone(),
                _ => unreachable!("part uri is a string"),
            };
            let part_uri = uri_resolve(source_uri, &part_path);
            debug!(part = %part_uri.display(), "load part");
            let part_location = self.builder.source_mut().load_file(&part_uri);
            if part_location.is_invalid() {
                return Err(self.error(
                    ErrorKind::Load,
                    Location::invalid(),
                    format!("Cannot open part '{}'", part_uri.display()),
                ));
            }
            let part_unit = self.builder.build_unit(part_location)?;
            parts.push(part_unit);
        }

        Ok(self.builder.new_node(Node::Library {
            unit,
            parts,
            scope: None,
        }))
    }

    fn build_library_scope(&mut self, library: NodeId, outer: ScopeId) -> Result<ScopeId> {
        let scope = self.scopes.new_scope(Some(outer));
        let (unit, parts) = match self.builder.node(library) {
            Node::Library { unit, parts, .. } => (*unit, parts.clone()),
            _ => unreachable!("expected library"),
        };
        self.populate_unit_scope(library, unit, scope)?;
        for part in parts {
            self.populate_unit_scope(library, part, scope)?;
        }
        Ok(scope)
    }

    fn populate_unit_scope(&mut self, library: NodeId, unit: NodeId, scope: ScopeId) -> Result<()> {
        let declarations = match self.builder.node(unit) {
            Node::CompilationUnit { declarations } => declarations.clone(),
            _ => unreachable!("expected unit"),
        };
        for declaration in declarations {
            match self.builder.node(declaration).clone() {
                Node::Class(class) => {
                    let name_id = self.builder.identifier_id(class.name);
                    self.add_member_to_scope(scope, name_id, declaration, class.name)?;
                    let class_scope = self.scopes.new_scope(Some(scope));
                    self.populate_class_scope(declaration, class_scope)?;
                    let data = self.builder.class_mut(declaration);
                    data.scope = Some(class_scope);
                    data.library = Some(library);
                }
                Node::Method(method) => {
                    let name = method.name;
                    let name_id = self.builder.identifier_id(name);
                    if method.modifiers.is_static() {
                        return Err(self.error(
                            ErrorKind::Load,
                            self.builder.identifier_location(name),
                            "Top-level method can not be static",
                        ));
                    }
                    if !method.modifiers.is_external()
                        && !method.modifiers.is_native()
                        && matches!(
                            method.body.map(|body| self.builder.node(body)),
                            Some(Node::EmptyStatement)
                        )
                    {
                        return Err(self.error(
                            ErrorKind::Load,
                            self.builder.identifier_location(name),
                            "A top-level method can not be abstract",
                        ));
                    }
                    self.builder.method_mut(declaration).owner = Some(Owner::Library(library));
                    if method.modifiers.is_set() {
                        self.add_setter_to_scope(scope, name_id, declaration, name)?;
                        continue;
                    }
                    self.add_member_to_scope(scope, name_id, declaration, name)?;
                }
                Node::VariableDeclarationStatement { declarations, .. } => {
                    for var in declarations {
                        let data = self.builder.variable(var);
                        let name_id = self.builder.identifier_id(data.name);
                        if data.modifiers.is_static() {
                            return Err(self.error(
                                ErrorKind::Load,
                                self.builder.identifier_location(data.name),
                                "Top-level field can not be static",
                            ));
                        }
                        self.add_member_to_scope(scope, name_id, var, data.name)?;
                        self.builder.variable_mut(var).owner = Some(Owner::Library(library));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn populate_class_scope(&mut self, class_node: NodeId, scope: ScopeId) -> Result<()> {
        let class = self.builder.class(class_node);
        let class_name_id = self.builder.identifier_id(class.name);
        let mut constructors = Vec::new();
        for declaration in class.declarations.clone() {
            match self.builder.node(declaration).clone() {
                Node::Method(method) => {
                    self.builder.method_mut(declaration).owner =
                        Some(Owner::Class(class_node));
                    let is_dot = matches!(self.builder.node(method.name), Node::Dot { .. });
                    let name_id = self.builder.identifier_id(method.name);
                    if is_dot || name_id == class_name_id {
                        constructors.push(declaration);
                        continue;
                    }
                    if method.modifiers.is_factory() {
                        return Err(self.error(
                            ErrorKind::Load,
                            self.builder.identifier_location(method.name),
                            "A factory must be named after its class",
                        ));
                    }
                    if method.modifiers.is_static()
                        && !method.modifiers.is_external()
                        && !method.modifiers.is_native()
                        && matches!(
                            method.body.map(|body| self.builder.node(body)),
                            Some(Node::EmptyStatement)
                        )
                    {
                        return Err(self.error(
                            ErrorKind::Load,
                            self.builder.identifier_location(method.name),
                            "A static method can not be abstract",
                        ));
                    }
                    if method.modifiers.is_set() {
                        self.add_setter_to_scope(scope, name_id, declaration, method.name)?;
                        continue;
                    }
                    self.add_member_to_scope(scope, name_id, declaration, method.name)?;
                }
                Node::VariableDeclarationStatement { declarations, .. } => {
                    for var in declarations {
                        let data = self.builder.variable(var);
                        let name_id = self.builder.identifier_id(data.name);
                        self.add_member_to_scope(scope, name_id, var, data.name)?;
                        self.builder.variable_mut(var).owner = Some(Owner::Class(class_node));
                    }
                }
                _ => {}
            }
        }
        // Constructor names must not collide with member names.
        for constructor in constructors {
            let data = self.builder.method(constructor);
            if data.modifiers.is_static() {
                return Err(self.error(
                    ErrorKind::Load,
                    self.builder.identifier_location(data.name),
                    "A constructor can not be static",
                ));
            }
            if let Node::Dot { object, name } = self.builder.node(data.name).clone() {
                let object_id = self.builder.identifier_id(object);
                if object_id != class_name_id {
                    return Err(self.error(
                        ErrorKind::Load,
                        self.builder.identifier_location(object),
                        format!(
                            "Named constructor must start with the class name '{}'",
                            self.builder.lookup_identifier(class_name_id)
                        ),
                    ));
                }
                let name_id = self.builder.identifier_id(name);
                if let Some(ScopeEntry::Member(member)) = self.scopes.lookup_local(scope, name_id)
                {
                    if self.scopes.member(member).member.is_some() {
                        return Err(self.error(
                            ErrorKind::Load,
                            self.builder.identifier_location(name),
                            format!(
                                "Multiple declarations with name '{}'",
                                self.builder.lookup_identifier(name_id)
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn add_member_to_scope(
        &mut self,
        scope: ScopeId,
        name_id: i32,
        node: NodeId,
        name: NodeId,
    ) -> Result<()> {
        let member = match self.scopes.lookup_local(scope, name_id) {
            Some(ScopeEntry::Member(member)) => {
                let data = self.scopes.member(member);
                let node_is_variable =
                    matches!(self.builder.node(node), Node::VariableDeclaration(_));
                if data.member.is_some() || node_is_variable {
                    return Err(self.error(
                        ErrorKind::Load,
                        self.builder.identifier_location(name),
                        format!(
                            "Multiple declarations with name '{}'",
                            self.builder.lookup_identifier(name_id)
                        ),
                    ));
                }
                member
            }
            Some(_) => {
                return Err(self.error(
                    ErrorKind::Load,
                    self.builder.identifier_location(name),
                    format!(
                        "Multiple declarations with name '{}'",
                        self.builder.lookup_identifier(name_id)
                    ),
                ));
            }
            None => {
                let member = self.scopes.new_member(name_id);
                self.scopes.add(scope, name_id, ScopeEntry::Member(member));
                member
            }
        };
        self.scopes.member_mut(member).member = Some(node);
        Ok(())
    }

    fn add_setter_to_scope(
        &mut self,
        scope: ScopeId,
        name_id: i32,
        method: NodeId,
        name: NodeId,
    ) -> Result<()> {
        let member = match self.scopes.lookup_local(scope, name_id) {
            Some(ScopeEntry::Member(member)) => {
                let data = self.scopes.member(member);
                let member_is_variable = data
                    .member
                    .map(|node| matches!(self.builder.node(node), Node::VariableDeclaration(_)))
                    .unwrap_or(false);
                if data.setter.is_some() || member_is_variable {
                    return Err(self.error(
                        ErrorKind::Load,
                        self.builder.identifier_location(name),
                        format!(
                            "Multiple setters with name '{}'",
                            self.builder.lookup_identifier(name_id)
                        ),
                    ));
                }
                member
            }
            Some(_) => {
                return Err(self.error(
                    ErrorKind::Load,
                    self.builder.identifier_location(name),
                    format!(
                        "Multiple setters with name '{}'",
                        self.builder.lookup_identifier(name_id)
                    ),
                ));
            }
            None => {
                let member = self.scopes.new_member(name_id);
                self.scopes.add(scope, name_id, ScopeEntry::Member(member));
                member
            }
        };
        self.scopes.member_mut(member).setter = Some(method);
        Ok(())
    }
}
