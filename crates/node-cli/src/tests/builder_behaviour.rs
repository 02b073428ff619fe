//! Behavioural tests for the composition phases: ordering, collisions,
//! provider selection, and the informational invocations.

use std::cell::RefCell;

use clap::Arg;
use rstest::{fixture, rstest};
use rstest_bdd_macros::{given, scenario, then, when};

use crate::builder::{BuildError, Invocation, Registration};
use crate::flags::{FlagError, FlagSet};
use crate::node::Node;
use crate::options::{Opt, log_options, trace_options};
use crate::opts::BaseOptions;
use crate::provider::RegistryError;
use crate::telemetry::{LogConfig, LogLevel, TraceConfig};
use crate::test_support::LifecycleEvent;

use super::support::{Harness, harness};

type Outcome = Result<Invocation, BuildError>;

struct CompositionWorld {
    harness: Harness,
    options: Vec<Opt>,
    callbacks: usize,
    outcome: Option<Outcome>,
    repeat: Option<Outcome>,
}

impl CompositionWorld {
    fn new() -> Self {
        Self {
            harness: harness(),
            options: Vec::new(),
            callbacks: 0,
            outcome: None,
            repeat: None,
        }
    }

    fn next_callback(&mut self) -> usize {
        let index = self.callbacks;
        self.callbacks += 1;
        index
    }

    fn build(&mut self, args: &str) -> Outcome {
        let argv: Vec<&str> = args.split_whitespace().collect();
        let options = std::mem::take(&mut self.options);
        self.harness.build(options, &argv)
    }

    fn outcome(&self) -> &Outcome {
        self.outcome
            .as_ref()
            .unwrap_or_else(|| panic!("the node was never built"))
    }

    fn node(&self) -> &Node {
        match self.outcome() {
            Ok(Invocation::Run(node)) => node,
            other => panic!("expected a runnable node, got {other:?}"),
        }
    }

    fn error(&self) -> &BuildError {
        match self.outcome() {
            Err(error) => error,
            Ok(invocation) => panic!("expected composition to fail, got {invocation:?}"),
        }
    }
}

#[fixture]
fn world() -> RefCell<CompositionWorld> {
    RefCell::new(CompositionWorld::new())
}

fn list(raw: &str) -> Vec<String> {
    raw.split(',').map(|item| item.trim().to_owned()).collect()
}

#[given("a composition harness")]
fn given_harness(world: &RefCell<CompositionWorld>) {
    let _ = world;
}

#[given("the logging and tracing option units")]
fn given_logging_and_tracing(world: &RefCell<CompositionWorld>) {
    let mut state = world.borrow_mut();
    state.options.extend(log_options(LogConfig::default()));
    state.options.extend(trace_options(TraceConfig::new()));
}

#[given("the logging option units")]
fn given_logging(world: &RefCell<CompositionWorld>) {
    world
        .borrow_mut()
        .options
        .extend(log_options(LogConfig::default()));
}

#[given("a succeeding pre-run callback")]
fn given_succeeding_callback(world: &RefCell<CompositionWorld>) {
    let mut state = world.borrow_mut();
    let index = state.next_callback();
    let option = state.harness.callbacks.succeeding(index);
    state.options.push(option);
}

#[given("a pre-run callback failing with \"{message}\"")]
fn given_failing_callback(world: &RefCell<CompositionWorld>, message: String) {
    let mut state = world.borrow_mut();
    state.next_callback();
    let option = state.harness.callbacks.failing(&message);
    state.options.push(option);
}

#[given("a flag set \"{set}\" defining \"{flag}\"")]
fn given_flag_set(world: &RefCell<CompositionWorld>, set: String, flag: String) {
    let id = format!("{set}-{}", flag.trim_start_matches('-'));
    let arg = match flag.strip_prefix("--") {
        Some(long) => Arg::new(id).long(long.to_owned()),
        None => Arg::new(id).short(flag.chars().last().unwrap_or('h')),
    };
    world
        .borrow_mut()
        .options
        .push(Opt::persistent_flags(FlagSet::new(set).arg(arg)));
}

#[given("the provider name is cleared")]
fn given_provider_cleared(world: &RefCell<CompositionWorld>) {
    world
        .borrow_mut()
        .options
        .push(Opt::base_with(|options| options.provider.clear()));
}

#[given("another provider registered as \"{name}\"")]
fn given_another_provider(world: &RefCell<CompositionWorld>, name: String) {
    let mut state = world.borrow_mut();
    let factory = state.harness.provider.factory();
    state.options.push(Opt::provider(name, factory));
}

#[given("the provider factory fails with \"{message}\"")]
fn given_factory_failure(world: &RefCell<CompositionWorld>, message: String) {
    world.borrow().harness.provider.fail_factory(message);
}

#[given("the CLI version \"{version}\" built at \"{time}\"")]
fn given_cli_version(world: &RefCell<CompositionWorld>, version: String, time: String) {
    world
        .borrow_mut()
        .options
        .push(Opt::cli_version(version, time));
}

#[when("the node is built with \"{args}\"")]
fn when_built_with(world: &RefCell<CompositionWorld>, args: String) {
    let outcome = world.borrow_mut().build(&args);
    world.borrow_mut().outcome = Some(outcome);
}

#[when("the node is built without arguments")]
fn when_built_without_arguments(world: &RefCell<CompositionWorld>) {
    let outcome = world.borrow_mut().build("");
    world.borrow_mut().outcome = Some(outcome);
}

#[when("the node is built twice with \"{args}\"")]
fn when_built_twice(world: &RefCell<CompositionWorld>, args: String) {
    let first = world.borrow_mut().build(&args);
    let second = world.borrow_mut().build(&args);
    let mut state = world.borrow_mut();
    state.outcome = Some(first);
    state.repeat = Some(second);
}

#[then("composition succeeds for node \"{name}\"")]
fn then_node_composed(world: &RefCell<CompositionWorld>, name: String) {
    assert_eq!(world.borrow().node().options().node_name, name);
}

#[then("the pre-run callbacks ran in order \"{order}\"")]
fn then_callbacks_ran(world: &RefCell<CompositionWorld>, order: String) {
    let expected: Vec<usize> = list(&order)
        .iter()
        .map(|index| index.parse().expect("numeric callback index"))
        .collect();
    assert_eq!(world.borrow().harness.callbacks.calls(), expected);
}

#[then("no pre-run callback ran")]
fn then_no_callback_ran(world: &RefCell<CompositionWorld>) {
    assert!(world.borrow().harness.callbacks.calls().is_empty());
}

#[then("the log level is \"{level}\"")]
fn then_log_level(world: &RefCell<CompositionWorld>, level: String) {
    let expected: LogLevel = level.parse().expect("known log level");
    assert_eq!(world.borrow().harness.telemetry.log().level(), Some(expected));
}

#[then("the log level is unset")]
fn then_log_level_unset(world: &RefCell<CompositionWorld>) {
    assert_eq!(world.borrow().harness.telemetry.log().level(), None);
}

#[then("tracing is disabled")]
fn then_tracing_disabled(world: &RefCell<CompositionWorld>) {
    assert!(world.borrow().harness.telemetry.trace().provider().is_none());
}

#[then("the provider factory ran once for node \"{name}\"")]
fn then_factory_ran_once(world: &RefCell<CompositionWorld>, name: String) {
    let names: Vec<String> = world
        .borrow()
        .harness
        .provider
        .factory_calls()
        .into_iter()
        .map(|config| config.node_name)
        .collect();
    assert_eq!(names, [name]);
}

#[then("no provider was constructed")]
fn then_no_provider(world: &RefCell<CompositionWorld>) {
    assert!(world.borrow().harness.provider.factory_calls().is_empty());
}

#[then("the reporter recorded a successful build of \"{name}\"")]
fn then_build_reported(world: &RefCell<CompositionWorld>, name: String) {
    assert_eq!(
        world.borrow().harness.reporter.events(),
        vec![
            LifecycleEvent::BuildStarting,
            LifecycleEvent::BuildSucceeded {
                node: name,
                provider: String::from("mock"),
            },
        ]
    );
}

#[then("the reporter recorded a failed build")]
fn then_failure_reported(world: &RefCell<CompositionWorld>) {
    assert!(matches!(
        world.borrow().harness.reporter.events().last(),
        Some(LifecycleEvent::BuildFailed(_))
    ));
}

#[then("composition fails in pre-run callback {index}")]
fn then_pre_run_failed(world: &RefCell<CompositionWorld>, index: usize) {
    let state = world.borrow();
    let error = state.error();
    assert!(
        matches!(error, BuildError::PreRun { index: failed, .. } if *failed == index),
        "expected pre-run callback {index} to fail, got {error}"
    );
}

#[then("the error mentions \"{text}\"")]
fn then_error_mentions(world: &RefCell<CompositionWorld>, text: String) {
    let rendered = world.borrow().error().to_string();
    assert!(rendered.contains(&text), "'{rendered}' should mention '{text}'");
}

#[then("composition fails with a duplicate flag")]
fn then_duplicate_flag(world: &RefCell<CompositionWorld>) {
    assert!(matches!(
        world.borrow().error(),
        BuildError::Flag {
            source: FlagError::Duplicate { .. }
        }
    ));
}

#[then("composition fails with an unknown provider \"{name}\" listing \"{available}\"")]
fn then_unknown_provider(world: &RefCell<CompositionWorld>, name: String, available: String) {
    let state = world.borrow();
    let BuildError::Registry {
        source:
            RegistryError::Unknown {
                name: requested,
                available: listed,
            },
    } = state.error()
    else {
        panic!("expected an unknown provider, got {:?}", state.error());
    };
    assert_eq!(requested, &name);
    assert_eq!(listed, &list(&available));
}

#[then("composition fails with a missing provider")]
fn then_missing_provider(world: &RefCell<CompositionWorld>) {
    assert!(matches!(
        world.borrow().error(),
        BuildError::Registry {
            source: RegistryError::Missing { .. }
        }
    ));
}

#[then("composition fails with a duplicate provider \"{name}\"")]
fn then_duplicate_provider(world: &RefCell<CompositionWorld>, name: String) {
    assert!(matches!(
        world.borrow().error(),
        BuildError::Registry {
            source: RegistryError::Duplicate { name: duplicate }
        } if *duplicate == name
    ));
}

#[then("composition fails in the factory of provider \"{name}\"")]
fn then_factory_failed(world: &RefCell<CompositionWorld>, name: String) {
    assert!(matches!(
        world.borrow().error(),
        BuildError::Provider { name: failed, .. } if *failed == name
    ));
}

#[then("composition fails while parsing")]
fn then_parse_failed(world: &RefCell<CompositionWorld>) {
    assert!(matches!(world.borrow().error(), BuildError::Parse { .. }));
}

#[then("help is rendered listing \"{flags}\"")]
fn then_help_rendered(world: &RefCell<CompositionWorld>, flags: String) {
    let state = world.borrow();
    let Ok(Invocation::Help(text)) = state.outcome() else {
        panic!("expected help output, got {:?}", state.outcome());
    };
    for flag in list(&flags) {
        assert!(text.contains(&flag), "help should list {flag}");
    }
}

#[then("the version output is \"{text}\"")]
fn then_version_output(world: &RefCell<CompositionWorld>, text: String) {
    let state = world.borrow();
    let Ok(Invocation::Version(info)) = state.outcome() else {
        panic!("expected version output, got {:?}", state.outcome());
    };
    assert_eq!(info.to_string(), text);
}

#[then("the provider listing is \"{names}\"")]
fn then_provider_listing(world: &RefCell<CompositionWorld>, names: String) {
    let state = world.borrow();
    let Ok(Invocation::Providers(listed)) = state.outcome() else {
        panic!("expected provider listing, got {:?}", state.outcome());
    };
    assert_eq!(listed, &list(&names));
}

#[then("both builds resolve identical options")]
fn then_identical_builds(world: &RefCell<CompositionWorld>) {
    let state = world.borrow();
    let Some(Ok(Invocation::Run(repeat))) = state.repeat.as_ref() else {
        panic!("expected a second runnable node");
    };
    assert_eq!(state.node().options(), repeat.options());
}

#[scenario(
    path = "tests/features/node_composition.feature",
    name = "Valid options compose a node"
)]
fn valid_options_compose(world: RefCell<CompositionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/node_composition.feature",
    name = "A failing last callback stops the build"
)]
fn failing_last_callback(world: RefCell<CompositionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/node_composition.feature",
    name = "A failing middle callback skips later callbacks"
)]
fn failing_middle_callback(world: RefCell<CompositionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/node_composition.feature",
    name = "Colliding flag sets fail in registration order"
)]
fn colliding_flags_in_order(world: RefCell<CompositionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/node_composition.feature",
    name = "Colliding flag sets fail in reverse registration order"
)]
fn colliding_flags_reversed(world: RefCell<CompositionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/node_composition.feature",
    name = "A flag reusing a base flag name fails"
)]
fn flag_reusing_base_name(world: RefCell<CompositionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/node_composition.feature",
    name = "A flag reusing the help shorthand fails"
)]
fn flag_reusing_help_shorthand(world: RefCell<CompositionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/node_composition.feature",
    name = "An unknown provider invokes no factory"
)]
fn unknown_provider(world: RefCell<CompositionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/node_composition.feature",
    name = "An empty provider name is reported missing"
)]
fn empty_provider_name(world: RefCell<CompositionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/node_composition.feature",
    name = "Registering a provider name twice fails"
)]
fn duplicate_provider(world: RefCell<CompositionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/node_composition.feature",
    name = "A failing provider factory aborts the build"
)]
fn failing_factory(world: RefCell<CompositionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/node_composition.feature",
    name = "Malformed flag values fail parsing"
)]
fn malformed_flag_values(world: RefCell<CompositionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/node_composition.feature",
    name = "An invalid log level fails in pre-run"
)]
fn invalid_log_level(world: RefCell<CompositionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/node_composition.feature",
    name = "Help is rendered without running callbacks"
)]
fn help_without_callbacks(world: RefCell<CompositionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/node_composition.feature",
    name = "The version subcommand reports the CLI version"
)]
fn version_subcommand(world: RefCell<CompositionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/node_composition.feature",
    name = "The providers subcommand lists sorted names"
)]
fn providers_subcommand(world: RefCell<CompositionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/node_composition.feature",
    name = "Identical command lines resolve identical options"
)]
fn identical_command_lines(world: RefCell<CompositionWorld>) {
    drop(world);
}

#[rstest]
fn later_options_override_earlier_ones() {
    let options = vec![
        Opt::base(BaseOptions {
            node_name: String::from("first"),
            ..BaseOptions::default()
        }),
        Opt::base_with(|options| options.node_name = String::from("second")),
    ];

    let registration = Registration::fold(options).expect("registration");

    assert_eq!(registration.base.node_name, "second");
}

#[rstest]
fn identical_inputs_register_identically() {
    let make = || {
        let mut options = vec![Opt::base_with(|options| {
            options.provider = String::from("cri");
            options.disable_taint = true;
        })];
        options.extend(log_options(LogConfig::default()));
        options.extend(trace_options(TraceConfig::new()));
        options
    };

    let first = Registration::fold(make()).expect("first registration");
    let second = Registration::fold(make()).expect("second registration");

    assert_eq!(first.base, second.base);
    assert_eq!(first.namespace.flag_ids(), second.namespace.flag_ids());
    assert_eq!(first.namespace.owner("--log-level"), Some("logging"));
    assert_eq!(first.namespace.owner("--trace-exporter"), Some("tracing"));
}
