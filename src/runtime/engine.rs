//! Rhai engine setup for one run.
//!
//! Besides the statement hooks, the engine exposes the script-callable
//! primitives of the runner: operator prompts, cooperative `wait`,
//! `skip_script`, output capture for `print`/`debug`, and `import` of
//! utility scripts through the run's store.

use super::instrumentation::{EXCEPTION_HOOK, POST_LINE_HOOK, PRE_LINE_HOOK};
use super::loader::fetch_named;
use super::result::{ControlSignal, ScriptFault};
use super::script::{to_json, RhaiResult, RunningScript};
use rhai::module_resolvers::ModuleResolver;
use rhai::{Dynamic, Engine, EvalAltResult, ImmutableString, Module, Position, Scope, FLOAT, INT};
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Operator prompt functions. Each accepts one to three arguments; a
/// trailing object map is sent as keyword arguments.
pub const PROMPT_METHODS: [&str; 7] = [
    "ask",
    "ask_string",
    "message_box",
    "vertical_message_box",
    "combo_box",
    "prompt",
    "prompt_for_hazardous",
];

/// Host functions made available to scripts, such as command and
/// telemetry calls.
pub trait ScriptApi: Send + Sync {
    fn register(&self, engine: &mut Engine);
}

fn to_line(line: INT) -> usize {
    usize::try_from(line).unwrap_or(0)
}

/// Build the engine a run's instrumented text is evaluated with.
pub(crate) fn build_engine(run: &Arc<RunningScript>) -> Engine {
    let mut engine = Engine::new();
    // Guarded statements nest deeply.
    engine.set_max_expr_depths(0, 0);

    engine
        .register_type_with_name::<ScriptFault>("ScriptFault")
        .register_get("message", ScriptFault::get_message)
        .register_get("line", ScriptFault::get_line)
        .register_get("source", ScriptFault::get_source)
        .register_fn("to_string", |fault: &mut ScriptFault| fault.to_string());

    register_hooks(&mut engine, run);
    register_prompts(&mut engine, run);

    let out = Arc::clone(run);
    engine.on_print(move |text| out.output.write_line(text));
    let out = Arc::clone(run);
    engine.on_debug(move |text, _source, _pos| out.output.write_line(text));

    let waiter = Arc::clone(run);
    engine.register_fn("wait", move || waiter.script_wait(None));
    let waiter = Arc::clone(run);
    engine.register_fn("wait", move |seconds: FLOAT| waiter.script_wait(Some(seconds)));
    let waiter = Arc::clone(run);
    engine.register_fn("wait", move |seconds: INT| waiter.script_wait(Some(seconds as f64)));
    let skipper = Arc::clone(run);
    engine.register_fn("skip_script", move || skipper.skip());

    engine.set_module_resolver(UtilityResolver {
        run: Arc::clone(run),
    });

    for api in &run.shared.apis {
        api.register(&mut engine);
    }
    engine
}

fn register_hooks(engine: &mut Engine, run: &Arc<RunningScript>) {
    let hook = Arc::clone(run);
    engine.register_fn(PRE_LINE_HOOK, move |filename: ImmutableString, line: INT| {
        hook.pre_line(filename.as_str(), to_line(line))
    });
    let hook = Arc::clone(run);
    engine.register_fn(POST_LINE_HOOK, move |filename: ImmutableString, line: INT| {
        hook.post_line(filename.as_str(), to_line(line))
    });
    let hook = Arc::clone(run);
    engine.register_fn(
        EXCEPTION_HOOK,
        move |caught: Dynamic, filename: ImmutableString, line: INT| {
            hook.on_exception(caught, filename.as_str(), to_line(line))
        },
    );
}

fn register_prompts(engine: &mut Engine, run: &Arc<RunningScript>) {
    for method in PROMPT_METHODS {
        let asker = Arc::clone(run);
        engine.register_fn(method, move |a: Dynamic| prompt(&asker, method, vec![a]));
        let asker = Arc::clone(run);
        engine.register_fn(method, move |a: Dynamic, b: Dynamic| {
            prompt(&asker, method, vec![a, b])
        });
        let asker = Arc::clone(run);
        engine.register_fn(method, move |a: Dynamic, b: Dynamic, c: Dynamic| {
            prompt(&asker, method, vec![a, b, c])
        });
    }
}

fn prompt(run: &RunningScript, method: &str, mut args: Vec<Dynamic>) -> RhaiResult<Dynamic> {
    let mut kwargs = serde_json::Map::new();
    if args.last().map_or(false, Dynamic::is_map) {
        if let Some(Value::Object(map)) = args.pop().map(|last| to_json(&last)) {
            kwargs = map;
        }
    }
    let args = args.iter().map(to_json).collect();
    let answer = run.prompt(method, args, kwargs)?;
    rhai::serde::to_dynamic(answer)
}

/// Resolves `import "<name>"` through the run's store.
///
/// The utility is instrumented like any other file, so its functions stop
/// at breakpoints, but its top level runs without instrumentation.
struct UtilityResolver {
    run: Arc<RunningScript>,
}

impl ModuleResolver for UtilityResolver {
    fn resolve(
        &self,
        engine: &Engine,
        _source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> RhaiResult<Arc<Module>> {
        let run = &self.run;
        let shared = &run.shared;

        let (name, text) = match shared.file_cache.text(path) {
            Some(text) => (path.to_string(), text),
            None => fetch_named(shared.store.as_ref(), path).map_err(|e| {
                debug!("Utility {} not found: {:#}", path, e);
                EvalAltResult::ErrorModuleNotFound(path.to_string(), pos)
            })?,
        };
        shared.file_cache.insert_text(&name, &text);

        let instrumented = shared
            .file_cache
            .instrumented(&name, &text, false, &run.cancel_instrumentation)
            .map_err(|e| in_module(path, format!("{:#}", e).into(), pos))?
            .ok_or_else(|| ControlSignal::Stop.into_error())?;

        let mut ast = engine
            .compile(&instrumented)
            .map_err(|e| in_module(path, e.into(), pos))?;
        ast.set_source(name.as_str());

        let saved = run.use_instrumentation.swap(false, Ordering::SeqCst);
        let module = Module::eval_ast_as_new(Scope::new(), &ast, engine);
        run.use_instrumentation.store(saved, Ordering::SeqCst);

        match module {
            Ok(module) => {
                debug!("Loaded utility {}", name);
                Ok(Arc::new(module))
            }
            Err(e) if ControlSignal::from_error(&e).is_some() => Err(e),
            Err(e) => Err(in_module(path, e, pos)),
        }
    }
}

fn in_module(path: &str, err: Box<EvalAltResult>, pos: Position) -> Box<EvalAltResult> {
    EvalAltResult::ErrorInModule(path.to_string(), err, pos).into()
}
