//! Integration tests for module enable/disable.

mod common;

use common::*;
use devstack_bundles::{ModuleActivation, ensure_active_config};
use devstack_core::Error;
use pretty_assertions::assert_eq;

fn materialized_php(ctx: &TestContext) -> ModuleActivation {
    ctx.create_php_bundle("8.3.4");
    let catalog = ctx.catalog();
    let paths =
        ensure_active_config(catalog.get("php").unwrap(), ctx.root(), "8.3.4", None, false)
            .unwrap();
    ModuleActivation::open(paths).unwrap()
}

#[test]
fn test_enable_then_disable_restores_scan_dirs() {
    let ctx = TestContext::new();
    let modules = materialized_php(&ctx);
    let paths = modules.paths().clone();

    for module in modules.available().unwrap() {
        let before: Vec<_> = paths.sapis.iter().map(|s| symlinks(&s.scan_dir)).collect();
        let definitions = snapshot(&paths.mods_available);
        if modules.is_enabled(&module).unwrap() {
            continue;
        }

        assert!(modules.enable(&module).unwrap());
        assert!(modules.is_enabled(&module).unwrap());
        assert!(modules.disable(&module).unwrap());

        let after: Vec<_> = paths.sapis.iter().map(|s| symlinks(&s.scan_dir)).collect();
        assert_eq!(after, before, "scan dirs changed by {}", module);
        assert_eq!(snapshot(&paths.mods_available), definitions);
    }
}

#[test]
fn test_list_reports_default_activation() {
    let ctx = TestContext::new();
    let modules = materialized_php(&ctx);

    let states = modules.list().unwrap();
    let names: Vec<_> = states.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["intl", "opcache", "redis"]);

    let opcache = states.iter().find(|s| s.name == "opcache").unwrap();
    assert_eq!(opcache.enabled_in, vec!["cli", "fpm"]);
    assert!(!states.iter().find(|s| s.name == "redis").unwrap().is_enabled());
}

#[test]
fn test_disabled_default_stays_disabled() {
    let ctx = TestContext::new();
    let modules = materialized_php(&ctx);

    assert!(modules.disable("opcache").unwrap());
    assert!(!modules.disable("opcache").unwrap());

    let catalog = ctx.catalog();
    ensure_active_config(catalog.get("php").unwrap(), ctx.root(), "8.3.4", None, false).unwrap();
    assert!(!modules.is_enabled("opcache").unwrap());
}

#[test]
fn test_enable_writes_missing_definition() {
    let ctx = TestContext::new();
    let modules = materialized_php(&ctx);
    let definition = modules.paths().mods_available.join("gd.ini");
    assert!(!definition.exists());

    modules.enable("gd").unwrap();
    assert_eq!(std::fs::read_to_string(&definition).unwrap(), "extension=gd.so\n");
    assert!(modules.is_enabled("gd").unwrap());

    assert!(!modules.enable("gd").unwrap());
}

#[test]
fn test_enable_unknown_module_fails() {
    let ctx = TestContext::new();
    let modules = materialized_php(&ctx);

    let err = modules.enable("imaginary").unwrap_err();
    assert!(matches!(err, Error::ModuleNotFound { ref module, .. } if module == "imaginary"));
    assert!(!modules.paths().mods_available.join("imaginary.ini").exists());
}

#[test]
fn test_requires_materialized_tree() {
    let ctx = TestContext::new();
    let catalog = ctx.catalog();
    let paths = catalog.resolve("php", "8.3.4", None).unwrap();

    let err = ModuleActivation::open(paths).err().unwrap();
    assert!(matches!(err, Error::NotMaterialized { .. }), "{}", err);
}
