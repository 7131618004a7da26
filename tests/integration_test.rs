use std::cell::Cell;
use std::rc::Rc;

use jsbridge::{
    BridgeConfig, BridgeError, BridgeResult, EvalFlags, JobStatus, PropertyFlags, Runtime,
    Scope, SymbolTable,
};
use proptest::prelude::*;

fn install(scope: &Scope<'_>, name: &str, symbol: &str) -> BridgeResult<()> {
    let function = scope.new_native_function(symbol)?;
    scope.globals().set_property_by_name(name, function)
}

fn module_runtime() -> Runtime {
    let config = BridgeConfig {
        enable_module_loader: true,
        ..BridgeConfig::default()
    };
    Runtime::with_config(config).unwrap()
}

#[test]
fn test_duplicate_and_free_balance() -> BridgeResult<()> {
    let rt = Runtime::new()?;
    rt.enter(|scope| {
        // 复制 N 次，释放 N+1 次，最后一次访问前值仍然有效
        let value = scope.new_object()?;
        value.set_property_by_name("tag", scope.new_string("alive")?)?;

        let mut copies: Vec<_> = (0..8).map(|_| value.duplicate()).collect();
        value.free();
        let last = copies.pop().expect("eight copies");
        for copy in copies {
            assert!(copy.is_object());
            copy.free();
        }
        assert_eq!(last.get_property_by_name("tag")?.to_string()?, "alive");
        Ok(())
    })?;
    rt.run_gc();
    Ok(())
}

#[test]
fn test_property_ownership_transfer() -> BridgeResult<()> {
    let rt = Runtime::new()?;
    rt.enter(|scope| {
        let obj = scope.new_object()?;
        let value = scope.new_float64(1.25);
        // 存储后值归容器所有，调用方不再持有
        obj.set_property_by_name("ratio", value)?;
        assert_eq!(obj.get_property_by_name("ratio")?.to_float64()?, 1.25);

        let key = scope.new_string("label")?;
        assert!(obj.set_property(&key, scope.new_string("x")?, PropertyFlags::NONE)?);
        assert_eq!(obj.get_property(&key)?.to_string()?, "x");
        Ok(())
    })
}

#[test]
fn test_echo_channel_identity() -> BridgeResult<()> {
    let rt = Runtime::new()?;
    rt.set_channel_fn(|scope, symbol, args| match symbol {
        "echo" => match args.first() {
            Some(arg) => Ok(arg.duplicate()),
            None => Ok(scope.new_undefined()),
        },
        other => Err(BridgeError::UnknownSymbol(other.to_string())),
    });

    rt.enter(|scope| {
        let echo = scope.new_native_function("echo")?;
        let input = scope.new_string("round trip")?;
        let output = scope.call(&echo, None, &[input.duplicate()])?;
        assert_eq!(output.to_string()?, input.to_string()?);
        Ok(())
    })
}

#[test]
fn test_module_loader_import() -> BridgeResult<()> {
    let rt = module_runtime();
    let requests = Rc::new(Cell::new(0));
    let seen = Rc::clone(&requests);
    rt.set_channel_fn(move |scope, symbol, args| {
        if symbol == "module_loader" && args[0].to_string()? == "foo" {
            seen.set(seen.get() + 1);
            return scope.new_string("export const x = 42;");
        }
        Ok(scope.new_null())
    });

    rt.enter(|scope| {
        scope.evaluate(
            "import {x} from \"foo\"; globalThis.result = x;",
            "main.js",
            EvalFlags::MODULE,
        )?;
        Ok(())
    })?;
    while rt.drain_one_pending_job()? != JobStatus::Empty {}

    let result = rt.enter(|scope| scope.globals().get_property_by_name("result")?.to_int64())?;
    assert_eq!(result, 42);
    assert_eq!(requests.get(), 1);
    Ok(())
}

#[test]
fn test_missing_module_fails_import() -> BridgeResult<()> {
    let rt = module_runtime();
    rt.set_channel_fn(|scope, _symbol, _args| Ok(scope.new_null()));
    rt.enter(|scope| {
        let result = scope.evaluate("import {y} from \"missing\";", "main.js", EvalFlags::MODULE);
        assert!(matches!(result, Err(BridgeError::Exception(_))));
        // 失败后运行时仍可使用
        assert_eq!(scope.evaluate("6 * 7", "after.js", EvalFlags::GLOBAL)?.to_int64()?, 42);
        Ok(())
    })
}

#[test]
fn test_module_syntax_error_fails_import() -> BridgeResult<()> {
    let rt = module_runtime();
    rt.set_channel_fn(|scope, symbol, args| match (symbol, args.first()) {
        ("module_loader", Some(name)) if name.to_string()? == "broken" => {
            scope.new_string("export const = ;")
        }
        _ => Ok(scope.new_null()),
    });

    rt.enter(|scope| {
        // 模块源码编译失败时导入失败，异常名为 SyntaxError
        let result = scope.evaluate("import { x } from 'broken';", "main.js", EvalFlags::MODULE);
        match result {
            Err(BridgeError::Exception(exception)) => {
                assert_eq!(exception.name.as_deref(), Some("SyntaxError"));
            }
            other => panic!("expected a SyntaxError, got {:?}", other),
        }
        assert!(scope.take_exception().is_none());
        assert_eq!(scope.evaluate("6 * 7", "after.js", EvalFlags::GLOBAL)?.to_int64()?, 42);
        Ok(())
    })
}

#[test]
fn test_setter_exception_surfaces() -> BridgeResult<()> {
    let rt = Runtime::new()?;
    rt.enter(|scope| {
        let target = scope.evaluate(
            "({ set boom(v) { throw new TypeError('setter failed'); } })",
            "setter.js",
            EvalFlags::GLOBAL,
        )?;
        let key = scope.new_string("boom")?;

        // 不带 THROW 标志时脚本异常依然返回错误
        let err = match target.set_property(&key, scope.new_int64(1), PropertyFlags::NONE) {
            Err(err) => err,
            Ok(stored) => panic!("setter exception was lost (stored = {})", stored),
        };
        match err {
            BridgeError::Exception(exception) => {
                assert_eq!(exception.name.as_deref(), Some("TypeError"));
                assert_eq!(exception.message, "setter failed");
            }
            other => panic!("expected a script exception, got {:?}", other),
        }

        // 冻结对象的写入被拒绝时不产生异常
        let frozen = scope.evaluate("Object.freeze({ boom: 0 })", "frozen.js", EvalFlags::GLOBAL)?;
        assert!(!frozen.set_property(&key, scope.new_int64(1), PropertyFlags::NONE)?);
        assert!(scope.take_exception().is_none());
        Ok(())
    })
}

#[test]
fn test_is_promise_runs_no_script() -> BridgeResult<()> {
    let rt = Runtime::new()?;
    rt.enter(|scope| {
        scope.evaluate(
            "globalThis.calls = 0; \
             Object.defineProperty(Promise, Symbol.hasInstance, { \
                 value: () => { calls++; return true; } \
             });",
            "has_instance.js",
            EvalFlags::GLOBAL,
        )?;
        let plain = scope.new_object()?;
        assert!(!plain.is_promise());
        assert_eq!(plain.type_name(), "object");
        assert_eq!(scope.globals().get_property_by_name("calls")?.to_int64()?, 0);

        // 替换全局 Promise 后真实的 Promise 仍能识别
        let promise = scope.evaluate(
            "globalThis.Promise = function () {}; (async () => 1)()",
            "replaced.js",
            EvalFlags::GLOBAL,
        )?;
        assert!(promise.is_promise());
        assert_eq!(promise.type_name(), "promise");

        let proxy = scope.evaluate(
            "new Proxy({}, { getPrototypeOf() { calls++; return null; } })",
            "proxy.js",
            EvalFlags::GLOBAL,
        )?;
        assert!(!proxy.is_promise());
        assert_eq!(scope.globals().get_property_by_name("calls")?.to_int64()?, 0);
        Ok(())
    })
}

#[test]
fn test_symbol_table_channel() -> BridgeResult<()> {
    let rt = module_runtime();
    let table = Rc::new(SymbolTable::new());
    table.register_function("add", |scope, args| {
        let mut sum = 0;
        for arg in args {
            sum += arg.to_int64()?;
        }
        Ok(scope.new_int64(sum))
    });
    table.register_module_source("module_loader", |name| match name {
        "math/consts.js" => Some("export const base = 10;".to_string()),
        "math/index.js" => Some("export { base } from './consts.js';".to_string()),
        _ => None,
    });
    rt.set_channel(Rc::clone(&table));

    rt.enter(|scope| {
        install(&scope, "add", "add")?;
        scope.evaluate(
            "import { base } from 'math/index.js'; globalThis.total = add(base, 1, 2);",
            "main.js",
            EvalFlags::MODULE,
        )?;
        Ok(())
    })?;

    let total = rt.enter(|scope| scope.globals().get_property_by_name("total")?.to_int64())?;
    assert_eq!(total, 13);
    Ok(())
}

#[test]
fn test_compile_then_load() -> BridgeResult<()> {
    let rt = Runtime::new()?;
    rt.enter(|scope| {
        let artifact = scope.compile("1+2", "t.js")?;
        let stored = artifact.to_bytes();
        // SAFETY: 字节来自同一构建中的 `to_bytes`
        let loaded = unsafe { jsbridge::CompiledArtifact::from_bytes(&stored) }?;
        assert_eq!(scope.load_and_run(&loaded)?.to_int64()?, 3);
        Ok(())
    })
}

#[test]
fn test_drain_pending_jobs() -> BridgeResult<()> {
    let rt = Runtime::new()?;
    rt.enter(|scope| {
        scope.evaluate(
            "Promise.resolve(20).then(v => { globalThis.settled = v + 1; });",
            "jobs.js",
            EvalFlags::GLOBAL,
        )?;
        assert!(scope.globals().get_property_by_name("settled")?.is_undefined());
        Ok(())
    })?;

    assert_eq!(rt.drain_one_pending_job()?, JobStatus::Executed);
    assert_eq!(rt.drain_one_pending_job()?, JobStatus::Empty);

    let settled = rt.enter(|scope| scope.globals().get_property_by_name("settled")?.to_int64())?;
    assert_eq!(settled, 21);
    Ok(())
}

#[test]
fn test_host_resolved_promise() -> BridgeResult<()> {
    let rt = Runtime::new()?;
    let kept = rt.enter(|scope| {
        let capability = scope.new_promise_capability()?;
        let then = scope.evaluate(
            "(p) => p.then(v => { globalThis.fromHost = v; })",
            "await.js",
            EvalFlags::GLOBAL,
        )?;
        scope.call(&then, None, &[capability.promise.duplicate()])?;
        rt.persist(&scope, capability.resolve)
    })?;

    // 在后续调用中完成 Promise
    rt.enter(|scope| {
        let resolve = kept.restore(&scope)?;
        scope.call(&resolve, None, &[scope.new_string("done")?])?;
        Ok(())
    })?;
    drop(kept);
    assert_eq!(rt.live_handles(), 0);

    while !rt.drain_one_pending_job()?.is_empty() {}
    let value = rt.enter(|scope| scope.globals().get_property_by_name("fromHost")?.to_string())?;
    assert_eq!(value, "done");
    Ok(())
}

#[test]
fn test_config_file_roundtrip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("jsbridge.toml");

    let config = BridgeConfig {
        memory_limit: Some(16 * 1024 * 1024),
        enable_module_loader: true,
        ..BridgeConfig::default()
    };
    config.save_toml(&path)?;
    let loaded = BridgeConfig::from_toml_file(&path)?;
    assert_eq!(loaded, config);

    let json_path = dir.path().join("jsbridge.json");
    loaded.save_json(&json_path)?;
    assert_eq!(BridgeConfig::from_json_file(&json_path)?, config);

    let rt = Runtime::with_config(loaded).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(rt.is_module_loader_enabled());
    Ok(())
}

proptest! {
    #[test]
    fn int64_round_trip(value in -(1i64 << 53)..=(1i64 << 53)) {
        let rt = Runtime::new().unwrap();
        let back = rt.enter(|scope| scope.new_int64(value).to_int64()).unwrap();
        prop_assert_eq!(back, value);
    }

    #[test]
    fn float64_round_trip(value in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
        let rt = Runtime::new().unwrap();
        let back = rt.enter(|scope| scope.new_float64(value).to_float64()).unwrap();
        prop_assert_eq!(back.to_bits(), value.to_bits());
    }

    #[test]
    fn string_round_trip(value in "\\PC*") {
        let rt = Runtime::new().unwrap();
        let back = rt.enter(|scope| scope.new_string(&value)?.to_string()).unwrap();
        prop_assert_eq!(back, value);
    }

    #[test]
    fn bool_round_trip(value in any::<bool>()) {
        let rt = Runtime::new().unwrap();
        let back = rt.enter(|scope| scope.new_bool(value).to_bool()).unwrap();
        prop_assert_eq!(back, value);
    }
}
