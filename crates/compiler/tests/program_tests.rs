//! Whole-program tests
//!
//! These drive the public pipeline: libraries on disk, the worklist
//! compiler, and the session stream. A small recording consumer checks
//! the dispatch model; the session tests decode the produced frames.

use micac::ast::NodeId;
use micac::compiler::{Compiler, CompilerConsumer};
use micac::emitter::Code;
use micac::error::Result;
use micac::{CompileOptions, Zone};
use mica_core::selector::{Selector, SelectorKind};
use mica_core::wire::{Frame, decode_stream};
use std::fs;
use std::path::Path;

fn write_file(dir: &Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).expect("write fixture");
}

// ----------------------------------------------------------------------
// Recording consumer.

#[derive(Default)]
struct Recorder {
    methods: Vec<(String, usize)>,
    classes: Vec<(String, Vec<(u32, i32)>)>,
    main_arity: Option<usize>,
    entry_id: Option<i32>,
}

impl CompilerConsumer for Recorder {
    fn initialize(&mut self, object_class_id: i32) -> Result<()> {
        assert_eq!(object_class_id, 0);
        Ok(())
    }

    fn do_method(&mut self, compiler: &Compiler, method: NodeId, code: &Code) -> Result<()> {
        let data = compiler.builder.method(method);
        let name = match compiler.builder.node(data.name) {
            micac::ast::Node::Identifier { id, .. } => {
                compiler.builder.lookup_identifier(*id).to_string()
            }
            _ => String::new(),
        };
        self.methods.push((name, code.arity));
        Ok(())
    }

    fn do_class(&mut self, compiler: &Compiler, class_id: i32) -> Result<()> {
        let compiled = compiler.get_compiled_class(class_id);
        let class = compiler.builder.class(compiled.node);
        let name = compiler
            .builder
            .lookup_identifier(compiler.builder.identifier_id(class.name))
            .to_string();
        let table = compiled
            .sorted_method_table()
            .into_iter()
            .map(|entry| (entry.selector, entry.method))
            .collect();
        self.classes.push((name, table));
        Ok(())
    }

    fn finalize(
        &mut self,
        _compiler: &Compiler,
        _statics: &[NodeId],
        main_arity: usize,
        entry_id: i32,
    ) -> Result<()> {
        self.main_arity = Some(main_arity);
        self.entry_id = Some(entry_id);
        Ok(())
    }
}

fn record(dir: &Path, root: &str) -> Recorder {
    let zone = Zone::new();
    let builder = micac::builder::Builder::new(&zone);
    let mut compiler = Compiler::new(builder, CompileOptions::new());
    let uri = dir.join(root);
    let root = compiler
        .load_library(&uri.to_string_lossy(), &uri)
        .expect("load");
    let mut recorder = Recorder::default();
    compiler
        .compile_library(root, &mut recorder)
        .expect("compile");
    recorder
}

#[test]
fn dispatch_tables_share_selectors_across_the_hierarchy() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(
        dir.path(),
        "main.mica",
        "class A { foo() => 1; }\n\
         class B extends A { foo() => 2; }\n\
         main() { var x = new B(); x.foo(); return x; }\n",
    );
    let recorder = record(dir.path(), "main.mica");

    let a = recorder
        .classes
        .iter()
        .find(|(name, _)| name == "A")
        .expect("class A emitted");
    let b = recorder
        .classes
        .iter()
        .find(|(name, _)| name == "B")
        .expect("class B emitted");

    // Both tables answer the same `foo` selector with different targets.
    let shared: Vec<u32> = a
        .1
        .iter()
        .map(|(selector, _)| *selector)
        .filter(|selector| b.1.iter().any(|(other, _)| other == selector))
        .collect();
    assert!(!shared.is_empty(), "A and B share no selector");
    for selector in shared {
        let target_a = a.1.iter().find(|(s, _)| *s == selector).unwrap().1;
        let target_b = b.1.iter().find(|(s, _)| *s == selector).unwrap().1;
        assert_ne!(target_a, target_b, "same target for overridden selector");
    }
}

#[test]
fn field_accessors_surface_in_the_method_table() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(
        dir.path(),
        "main.mica",
        "class C { var value; }\n\
         main() { var c = new C(); c.value = 4; return c.value; }\n",
    );
    let recorder = record(dir.path(), "main.mica");
    let c = recorder
        .classes
        .iter()
        .find(|(name, _)| name == "C")
        .expect("class C emitted");
    let kinds: Vec<SelectorKind> = c
        .1
        .iter()
        .map(|(selector, _)| Selector::from_raw(*selector).kind())
        .collect();
    assert!(kinds.contains(&SelectorKind::Getter), "{kinds:?}");
    assert!(kinds.contains(&SelectorKind::Setter), "{kinds:?}");
}

#[test]
fn method_ids_are_deterministic() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(
        dir.path(),
        "main.mica",
        "helper(x) => x + 1;\n\
         main() { return helper(41); }\n",
    );
    let first = record(dir.path(), "main.mica");
    let second = record(dir.path(), "main.mica");
    assert_eq!(first.methods, second.methods);
    assert_eq!(first.entry_id, second.entry_id);
    let classes_first: Vec<&String> = first.classes.iter().map(|(name, _)| name).collect();
    let classes_second: Vec<&String> = second.classes.iter().map(|(name, _)| name).collect();
    assert_eq!(classes_first, classes_second);
}

#[test]
fn main_arity_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(dir.path(), "main.mica", "main(arguments) { return arguments; }\n");
    let recorder = record(dir.path(), "main.mica");
    assert_eq!(recorder.main_arity, Some(1));
}

// ----------------------------------------------------------------------
// Session stream.

#[test]
fn session_stream_shape() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(dir.path(), "main.mica", "main() { return 42; }\n");
    let bytes = micac::compile_uri(
        &dir.path().join("main.mica"),
        CompileOptions::new(),
        Vec::new(),
    )
    .expect("compile");
    let frames = decode_stream(&bytes).expect("decode");

    // Three identity maps first.
    assert_eq!(frames[0].frame, Frame::NewMap);
    assert_eq!(frames[1].frame, Frame::NewMap);
    assert_eq!(frames[2].frame, Frame::NewMap);

    // One atomic commit, after every Change* frame.
    let commits: Vec<usize> = frames
        .iter()
        .enumerate()
        .filter(|(_, frame)| frame.frame == Frame::CommitChanges)
        .map(|(at, _)| at)
        .collect();
    assert_eq!(commits.len(), 1);
    let commit_at = commits[0];
    for (at, frame) in frames.iter().enumerate() {
        if matches!(
            frame.frame,
            Frame::ChangeSuperClass
                | Frame::ChangeMethodTable
                | Frame::ChangeMethodLiteral
                | Frame::ChangeStatics
        ) {
            assert!(at < commit_at, "change frame after commit");
        }
    }

    // The commit count covers every queued change.
    let mut reader = mica_core::wire::ReadBuffer::new(&frames[commit_at].payload);
    let committed = reader.read_i32();
    let queued = frames
        .iter()
        .filter(|frame| {
            matches!(
                frame.frame,
                Frame::ChangeSuperClass
                    | Frame::ChangeMethodTable
                    | Frame::ChangeMethodLiteral
                    | Frame::ChangeStatics
            )
        })
        .count();
    assert_eq!(committed as usize, queued);

    // Functions and classes were pushed.
    assert!(frames.iter().any(|frame| frame.frame == Frame::PushNewFunction));
    assert!(frames.iter().any(|frame| frame.frame == Frame::PushBuiltinClass));

    // The stream ends with main's arity and the entry method.
    let last = &frames[frames.len() - 1];
    assert_eq!(last.frame, Frame::PushFromMap);
    let arity_frame = &frames[frames.len() - 2];
    assert_eq!(arity_frame.frame, Frame::PushNewInteger);
    let mut reader = mica_core::wire::ReadBuffer::new(&arity_frame.payload);
    assert_eq!(reader.read_i64(), 0);
}

#[test]
fn session_stream_is_deterministic() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(
        dir.path(),
        "main.mica",
        "class Point { var x; var y; Point(this.x, this.y); }\n\
         main() { var p = new Point(1, 2); return p.x; }\n",
    );
    let uri = dir.path().join("main.mica");
    let first = micac::compile_uri(&uri, CompileOptions::new(), Vec::new()).expect("compile");
    let second = micac::compile_uri(&uri, CompileOptions::new(), Vec::new()).expect("compile");
    assert_eq!(first, second);
}

#[test]
fn constants_are_emitted_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(
        dir.path(),
        "main.mica",
        "main() { return 'shared' + 'shared'; }\n",
    );
    let bytes = micac::compile_uri(
        &dir.path().join("main.mica"),
        CompileOptions::new(),
        Vec::new(),
    )
    .expect("compile");
    let frames = decode_stream(&bytes).expect("decode");
    let shared_strings = frames
        .iter()
        .filter(|frame| {
            frame.frame == Frame::PushNewString && {
                let mut reader = mica_core::wire::ReadBuffer::new(&frame.payload);
                reader.read_bytes() == b"shared"
            }
        })
        .count();
    assert_eq!(shared_strings, 1);
}

// ----------------------------------------------------------------------
// Libraries on disk.

#[test]
fn imports_resolve_relative_to_the_importer() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(dir.path(), "util.mica", "helper() => 42;\n");
    write_file(
        dir.path(),
        "main.mica",
        "import 'util.mica';\nmain() { return helper(); }\n",
    );
    let recorder = record(dir.path(), "main.mica");
    assert!(recorder.methods.iter().any(|(name, _)| name == "helper"));
}

#[test]
fn prefixed_imports_bind_a_library_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(dir.path(), "util.mica", "helper() => 42;\n");
    write_file(
        dir.path(),
        "main.mica",
        "import 'util.mica' as u;\nmain() { return u.helper(); }\n",
    );
    let recorder = record(dir.path(), "main.mica");
    assert!(recorder.methods.iter().any(|(name, _)| name == "helper"));
}

#[test]
fn parts_merge_into_the_library_scope() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(dir.path(), "part.mica", "helper() => 1;\n");
    write_file(
        dir.path(),
        "main.mica",
        "part 'part.mica';\nmain() { return helper(); }\n",
    );
    let recorder = record(dir.path(), "main.mica");
    assert!(recorder.methods.iter().any(|(name, _)| name == "helper"));
}

#[test]
fn duplicate_declarations_fail_to_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(dir.path(), "main.mica", "foo() => 1;\nfoo() => 2;\nmain() {}\n");
    let result = micac::compile_uri(
        &dir.path().join("main.mica"),
        CompileOptions::new(),
        Vec::new(),
    );
    let diagnostic = result.err().expect("duplicate declaration must fail");
    assert_eq!(diagnostic.error.kind, micac::ErrorKind::Load);
}

#[test]
fn missing_files_fail_to_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(
        dir.path(),
        "main.mica",
        "import 'nope.mica';\nmain() {}\n",
    );
    let result = micac::compile_uri(
        &dir.path().join("main.mica"),
        CompileOptions::new(),
        Vec::new(),
    );
    let diagnostic = result.err().expect("missing import must fail");
    assert_eq!(diagnostic.error.kind, micac::ErrorKind::Load);
}

#[test]
fn library_root_supplies_the_core_library() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join("lib/core")).expect("mkdir");
    fs::create_dir_all(dir.path().join("lib/system")).expect("mkdir");
    write_file(
        &dir.path().join("lib/core"),
        "core.mica",
        "class Object { }\nclass String { }\n",
    );
    write_file(
        &dir.path().join("lib/system"),
        "system.mica",
        "_entry(arguments) { main(); }\n",
    );
    write_file(dir.path(), "main.mica", "main() { return 1; }\n");
    let zone = Zone::new();
    let builder = micac::builder::Builder::new(&zone);
    let options = CompileOptions::new().with_library_root(dir.path().join("lib"));
    let mut compiler = Compiler::new(builder, options);
    let uri = dir.path().join("main.mica");
    let root = compiler
        .load_library(&uri.to_string_lossy(), &uri)
        .expect("load");
    let mut recorder = Recorder::default();
    compiler
        .compile_library(root, &mut recorder)
        .expect("compile");
    // Object came from the on-disk core library and still has id 0.
    assert_eq!(recorder.classes[0].0, "Object");
}
