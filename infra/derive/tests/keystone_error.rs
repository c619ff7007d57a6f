#[test]
fn keystone_error_ui() {
    let t = trybuild::TestCases::new();
    t.pass("tests/ui/keystone_error_pass.rs");
    t.pass("tests/ui/keystone_error_kind.rs");
}
