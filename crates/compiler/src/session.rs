//! The session
//!
//! Streams the compiled program to the VM as ordered frames. Entities are
//! pushed into the three identity maps (classes, methods, constants) in
//! enqueue order; every mutation of an already-pushed object (super
//! links, method tables, literal patches, the statics table) is queued on
//! the VM side and released by one `CommitChanges(n)`, so the program
//! becomes runnable atomically. The stream ends with main's arity and
//! the entry method pushed on the VM stack.

use crate::ast::{Node, NodeId};
use crate::compiler::{Compiler, CompilerConsumer};
use crate::consts::ConstObject;
use crate::emitter::{Code, IdType, unpack_literal};
use crate::error::{CompileError, ErrorKind, Result};
use crate::source::Location;
use mica_core::names;
use mica_core::wire::{Connection, Frame, MapId};
use std::io::Write;

fn wire_error(error: std::io::Error) -> CompileError {
    CompileError::new(
        ErrorKind::Compile,
        Location::invalid(),
        format!("Session write failed: {error}"),
    )
}

pub struct Session<W: Write> {
    connection: Connection<W>,
    emit_names: bool,
}

impl<W: Write> Session<W> {
    pub fn new(sink: W, emit_names: bool) -> Session<W> {
        Session {
            connection: Connection::new(sink),
            emit_names,
        }
    }

    pub fn into_sink(self) -> W {
        self.connection.into_inner()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.connection.flush().map_err(wire_error)
    }

    fn send(&mut self, frame: Frame) -> Result<()> {
        self.connection.send(frame).map_err(wire_error)
    }

    pub fn new_map(&mut self, map: MapId) -> Result<()> {
        self.connection.write_i32(map as i32);
        self.send(Frame::NewMap)
    }

    pub fn push_from_map(&mut self, map: MapId, id: i64) -> Result<()> {
        self.connection.write_i32(map as i32);
        self.connection.write_i64(id);
        self.send(Frame::PushFromMap)
    }

    pub fn pop_to_map(&mut self, map: MapId, id: i64) -> Result<()> {
        self.connection.write_i32(map as i32);
        self.connection.write_i64(id);
        self.send(Frame::PopToMap)
    }

    pub fn dup(&mut self) -> Result<()> {
        self.send(Frame::Dup)
    }

    pub fn push_null(&mut self) -> Result<()> {
        self.send(Frame::PushNull)
    }

    pub fn push_boolean(&mut self, value: bool) -> Result<()> {
        self.connection.write_bool(value);
        self.send(Frame::PushBoolean)
    }

    pub fn push_new_integer(&mut self, value: i64) -> Result<()> {
        self.connection.write_i64(value);
        self.send(Frame::PushNewInteger)
    }

    pub fn push_new_double(&mut self, value: f64) -> Result<()> {
        self.connection.write_f64(value);
        self.send(Frame::PushNewDouble)
    }

    pub fn push_new_string(&mut self, value: &str) -> Result<()> {
        self.connection.write_str(value);
        self.send(Frame::PushNewString)
    }

    pub fn push_new_instance(&mut self) -> Result<()> {
        self.send(Frame::PushNewInstance)
    }

    pub fn push_new_array(&mut self, length: i32) -> Result<()> {
        self.connection.write_i32(length);
        self.send(Frame::PushNewArray)
    }

    pub fn push_new_function(&mut self, arity: usize, literals: usize, bytes: &[u8]) -> Result<()> {
        self.connection.write_i32(arity as i32);
        self.connection.write_i32(literals as i32);
        self.connection.write_bytes(bytes);
        self.send(Frame::PushNewFunction)
    }

    pub fn push_new_initializer(&mut self) -> Result<()> {
        self.send(Frame::PushNewInitializer)
    }

    pub fn push_new_class(&mut self, fields: usize) -> Result<()> {
        self.connection.write_i32(fields as i32);
        self.send(Frame::PushNewClass)
    }

    pub fn push_builtin_class(&mut self, name: i32, fields: usize) -> Result<()> {
        self.connection.write_i32(name);
        self.connection.write_i32(fields as i32);
        self.send(Frame::PushBuiltinClass)
    }

    pub fn push_constant_list(&mut self, length: usize) -> Result<()> {
        self.connection.write_i32(length as i32);
        self.send(Frame::PushConstantList)
    }

    pub fn push_constant_map(&mut self, length: usize) -> Result<()> {
        self.connection.write_i32(length as i32);
        self.send(Frame::PushConstantMap)
    }

    /// Symbolic name frames for bridge sessions; dropped otherwise.
    pub fn push_new_name(&mut self, name: &str) -> Result<()> {
        if !self.emit_names {
            return Ok(());
        }
        self.connection.write_str(name);
        self.send(Frame::PushNewName)
    }

    pub fn change_super_class(&mut self) -> Result<()> {
        self.send(Frame::ChangeSuperClass)
    }

    pub fn change_method_table(&mut self, length: usize) -> Result<()> {
        self.connection.write_i32(length as i32);
        self.send(Frame::ChangeMethodTable)
    }

    pub fn change_method_literal(&mut self, index: usize) -> Result<()> {
        self.connection.write_i32(index as i32);
        self.send(Frame::ChangeMethodLiteral)
    }

    pub fn change_statics(&mut self, count: usize) -> Result<()> {
        self.connection.write_i32(count as i32);
        self.send(Frame::ChangeStatics)
    }

    pub fn commit_changes(&mut self, count: i32) -> Result<()> {
        self.connection.write_i32(count);
        self.send(Frame::CommitChanges)
    }

    pub fn discard_changes(&mut self) -> Result<()> {
        self.send(Frame::DiscardChanges)
    }

    pub fn compiler_error(&mut self) -> Result<()> {
        self.send(Frame::CompilerError)
    }

    pub fn spawn_process_for_main(&mut self) -> Result<()> {
        self.send(Frame::SpawnProcessForMain)
    }

    pub fn run_process(&mut self) -> Result<()> {
        self.send(Frame::RunProcess)
    }

    pub fn session_end(&mut self) -> Result<()> {
        self.send(Frame::SessionEnd)
    }
}

/// Feeds the compiler's output into a session.
pub struct SessionConsumer<W: Write> {
    session: Session<W>,
    object_class_id: i32,
    classes: Vec<i32>,
    methods: Vec<(NodeId, Vec<i32>)>,
    changes: i32,
}

impl<W: Write> SessionConsumer<W> {
    pub fn new(session: Session<W>) -> SessionConsumer<W> {
        SessionConsumer {
            session,
            object_class_id: -1,
            classes: Vec::new(),
            methods: Vec::new(),
            changes: 0,
        }
    }

    /// Set up the three identity maps.
    pub fn begin(&mut self) -> Result<()> {
        self.session.push_new_name("classMap")?;
        self.session.new_map(MapId::Class)?;
        self.session.push_new_name("methodMap")?;
        self.session.new_map(MapId::Method)?;
        self.session.new_map(MapId::Constant)?;
        Ok(())
    }

    pub fn session_mut(&mut self) -> &mut Session<W> {
        &mut self.session
    }

    pub fn into_session(self) -> Session<W> {
        self.session
    }

    fn do_statics(&mut self, compiler: &Compiler, statics: &[NodeId]) -> Result<()> {
        for node in statics {
            let data = compiler.builder.variable(*node);
            if data.has_initializer() {
                self.session
                    .push_from_map(MapId::Method, data.initializer_id as i64)?;
                self.session.push_new_initializer()?;
            } else {
                self.session.push_null()?;
            }
        }
        self.session.change_statics(statics.len())?;
        self.changes += 1;
        Ok(())
    }

    fn do_constants(&mut self, compiler: &Compiler) -> Result<()> {
        let objects = compiler.const_pool.objects().to_vec();
        for (id, object) in objects.iter().enumerate() {
            self.encode_constant(compiler, object)?;
            self.session.pop_to_map(MapId::Constant, id as i64)?;
        }
        Ok(())
    }

    fn encode_constant(&mut self, compiler: &Compiler, object: &ConstObject) -> Result<()> {
        match object {
            ConstObject::Null => self.session.push_null(),
            ConstObject::True => self.session.push_boolean(true),
            ConstObject::False => self.session.push_boolean(false),
            ConstObject::Integer(value) => self.session.push_new_integer(*value),
            ConstObject::Double(value) => self.session.push_new_double(*value),
            ConstObject::Str(value) => self.session.push_new_string(value),
            ConstObject::List(elements) => {
                for element in elements {
                    self.session.push_from_map(MapId::Constant, *element as i64)?;
                }
                self.session.push_constant_list(elements.len())
            }
            ConstObject::Map(elements) => {
                let length = elements.len() / 2;
                for i in 0..length {
                    self.session
                        .push_from_map(MapId::Constant, elements[i * 2] as i64)?;
                }
                self.session.push_constant_list(length)?;
                for i in 0..length {
                    self.session
                        .push_from_map(MapId::Constant, elements[i * 2 + 1] as i64)?;
                }
                self.session.push_constant_list(length)?;
                self.session.push_constant_map(elements.len())
            }
            ConstObject::Instance { class, fields } => {
                for field in fields {
                    self.session.push_from_map(MapId::Constant, *field as i64)?;
                }
                let class_id = compiler.builder.class(*class).id;
                self.session.push_from_map(MapId::Class, class_id as i64)?;
                self.session.push_new_instance()
            }
        }
    }
}

impl<W: Write> CompilerConsumer for SessionConsumer<W> {
    fn initialize(&mut self, object_class_id: i32) -> Result<()> {
        debug_assert!(self.object_class_id < 0);
        self.object_class_id = object_class_id;
        Ok(())
    }

    fn do_method(&mut self, compiler: &Compiler, method: NodeId, code: &Code) -> Result<()> {
        for _ in 0..code.literal_ids.len() {
            self.session.push_null()?;
        }

        let data = compiler.builder.method(method);
        let name = match compiler.builder.node(data.name) {
            Node::Identifier { id, .. } => compiler.builder.lookup_identifier(*id),
            _ => "",
        };
        self.session.push_new_name(name)?;
        self.session
            .push_new_function(code.arity, code.literal_ids.len(), &code.bytes)?;
        self.session.pop_to_map(MapId::Method, data.id as i64)?;

        self.methods.push((method, code.literal_ids.clone()));
        Ok(())
    }

    fn do_class(&mut self, compiler: &Compiler, class_id: i32) -> Result<()> {
        debug_assert!(self.object_class_id >= 0);
        let compiled = compiler.get_compiled_class(class_id);
        let class = compiler.builder.class(compiled.node);
        let name_id = compiler.builder.identifier_id(class.name);
        let field_count = compiler.field_count(compiled.node, true);

        self.session
            .push_new_name(compiler.builder.lookup_identifier(name_id))?;
        if names::is_builtin_class_name(name_id as u32) {
            self.session.push_builtin_class(name_id, field_count)?;
        } else {
            self.session.push_new_class(field_count)?;
        }

        self.session.dup()?;
        self.session.pop_to_map(MapId::Class, class_id as i64)?;

        let table = compiled.sorted_method_table();
        for entry in &table {
            self.session.push_new_integer(entry.selector as i64)?;
            self.session.push_from_map(MapId::Method, entry.method as i64)?;
        }
        self.session.change_method_table(table.len())?;
        self.changes += 1;
        self.classes.push(class_id);
        Ok(())
    }

    fn finalize(
        &mut self,
        compiler: &Compiler,
        statics: &[NodeId],
        main_arity: usize,
        entry_id: i32,
    ) -> Result<()> {
        self.do_statics(compiler, statics)?;
        self.do_constants(compiler)?;

        // Wire up the super-class chain; classes without an explicit
        // super hang off the root object class.
        for class_id in self.classes.clone() {
            if class_id == self.object_class_id {
                continue;
            }
            let compiled = compiler.get_compiled_class(class_id);
            let super_id = match compiled.superclass {
                Some(superclass) => compiler.builder.class(superclass).id,
                None => self.object_class_id,
            };
            self.session.push_from_map(MapId::Class, class_id as i64)?;
            self.session.push_from_map(MapId::Class, super_id as i64)?;
            self.session.change_super_class()?;
            self.changes += 1;
        }

        // Patch every method's literal pool now that all ids exist.
        let methods = self.methods.clone();
        for (method, literal_ids) in methods {
            let method_id = compiler.builder.method(method).id;
            for (index, encoded) in literal_ids.iter().enumerate() {
                let (kind, id) = unpack_literal(*encoded);
                let map = match kind {
                    IdType::Method => MapId::Method,
                    IdType::Class => MapId::Class,
                    IdType::Constant => MapId::Constant,
                };
                self.session.push_from_map(MapId::Method, method_id as i64)?;
                self.session.push_from_map(map, id as i64)?;
                self.session.change_method_literal(index)?;
                self.changes += 1;
            }
        }

        self.session.commit_changes(self.changes)?;
        self.changes = 0;

        // Leave the entry method and main's arity on the VM stack.
        self.session.push_new_integer(main_arity as i64)?;
        self.session.push_from_map(MapId::Method, entry_id as i64)?;
        Ok(())
    }
}
