//! End-to-end tests for `import`, exercised against real files on disk
//! since module paths resolve relative to the importing script's directory.

use std::fs;

use seq_core::Heap;
use seq_runtime::VmConfig;

#[test]
fn import_runs_module_top_level_code_and_shares_globals() {
    let dir = tempfile::tempdir().unwrap();
    let module_path = dir.path().join("greeting.seq");
    fs::write(&module_path, "greeting := \"hi\"\nprint(greeting)\n").unwrap();

    let main_path = dir.path().join("main.seq");
    fs::write(&main_path, "import \"greeting.seq\"\nprint(greeting)\n").unwrap();

    let heap = Heap::new();
    let mut vm = seq_runtime::new_vm(&heap, VmConfig::default());
    let source = fs::read_to_string(&main_path).unwrap();
    vm.interpret(&source, Some(&main_path)).unwrap();
}

#[test]
fn importing_the_same_module_twice_reruns_its_top_level_code() {
    let dir = tempfile::tempdir().unwrap();
    let module_path = dir.path().join("counter.seq");
    fs::write(&module_path, "print(\"ran\")\n").unwrap();

    let main_path = dir.path().join("main.seq");
    fs::write(
        &main_path,
        "import \"counter.seq\"\nimport \"counter.seq\"\n",
    )
    .unwrap();

    let heap = Heap::new();
    let mut vm = seq_runtime::new_vm(&heap, VmConfig::default());
    let source = fs::read_to_string(&main_path).unwrap();
    vm.interpret(&source, Some(&main_path)).unwrap();
}

#[test]
fn importing_a_missing_module_reports_could_not_open_module() {
    let dir = tempfile::tempdir().unwrap();
    let main_path = dir.path().join("main.seq");
    fs::write(&main_path, "import \"missing.seq\"\n").unwrap();

    let heap = Heap::new();
    let mut vm = seq_runtime::new_vm(&heap, VmConfig::default());
    let source = fs::read_to_string(&main_path).unwrap();
    let err = vm.interpret(&source, Some(&main_path)).unwrap_err();
    assert_eq!(err.message, "Could not open module 'missing.seq'.");
}

#[test]
fn importing_a_module_with_a_syntax_error_reports_error_compiling_module() {
    let dir = tempfile::tempdir().unwrap();
    let module_path = dir.path().join("broken.seq");
    fs::write(&module_path, "if true {\n").unwrap();

    let main_path = dir.path().join("main.seq");
    fs::write(&main_path, "import \"broken.seq\"\n").unwrap();

    let heap = Heap::new();
    let mut vm = seq_runtime::new_vm(&heap, VmConfig::default());
    let source = fs::read_to_string(&main_path).unwrap();
    let err = vm.interpret(&source, Some(&main_path)).unwrap_err();
    assert_eq!(err.message, "Error compiling module 'broken.seq'.");
}
