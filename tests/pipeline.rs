//! Pipeline and dispatch behavior: registration idempotence, asynchronous
//! submission, module unload, and control-handle exclusion.

mod common;

use std::sync::Arc;

use cilweave::{
    definitions::{MethodProbe, ProbeHandler, ProbeTarget, WILDCARD},
    dispatch::{MethodIdentifier, RewriteState},
    host::{ModuleId, RuntimeEventSink},
    metadata::token::Token,
    Error, Settings, Weaver,
};

use common::{method_entry, tiny_body, FakeModule, RecordingRecompiler, SharedControl};

const MODULE: ModuleId = ModuleId(1);
const METHOD_TOKEN: u32 = 0x0600_0001;

fn sample_probe() -> MethodProbe {
    MethodProbe {
        target: ProbeTarget {
            assembly: WILDCARD.to_string(),
            type_name: "Svc.Worker".to_string(),
            method_name: "Foo".to_string(),
            param_types: Vec::new(),
        },
        handler: ProbeHandler {
            assembly: "Probes.Core".to_string(),
            type_name: "Probes.Handler".to_string(),
        },
    }
}

fn fake_module() -> Arc<FakeModule> {
    Arc::new(FakeModule::new("Svc.Assembly").with_method(method_entry(
        METHOD_TOKEN,
        "Svc.Worker",
        "Foo",
        &[0x00, 0x00, 0x01],
        true,
        false,
    )))
}

fn method() -> MethodIdentifier {
    MethodIdentifier {
        module: MODULE,
        method: Token::new(METHOD_TOKEN),
    }
}

#[test]
fn duplicate_registration_does_no_additional_work() {
    let fake = fake_module();
    let recompiler = Arc::new(RecordingRecompiler::new());
    let weaver = Weaver::attach(recompiler.clone(), Settings::default()).unwrap();
    weaver.module_loaded(MODULE, fake.clone(), fake.clone());

    assert!(weaver.register_probes("batch", vec![sample_probe()]).unwrap());
    assert!(!weaver.register_probes("batch", vec![sample_probe()]).unwrap());

    let registered = weaver.registered_probes().unwrap();
    assert_eq!(registered.len(), 1);

    let count = weaver.request_rewrite(&[MODULE], &registered).unwrap();
    assert_eq!(count, 1);

    // One record with one probe; the duplicate registration left no trace.
    let record = weaver.record(method()).unwrap().unwrap();
    assert_eq!(record.probes().unwrap().len(), 1);

    // Matching again creates no duplicate dispatch-table work either.
    let count = weaver.request_rewrite(&[MODULE], &registered).unwrap();
    assert_eq!(count, 1);
    let record = weaver.record(method()).unwrap().unwrap();
    assert_eq!(record.probes().unwrap().len(), 1);

    let batches = recompiler.submitted();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0], vec![method()]);
}

#[test]
fn async_submission_resolves_with_the_count() {
    let fake = fake_module();
    let recompiler = Arc::new(RecordingRecompiler::new());
    let weaver = Weaver::attach(recompiler.clone(), Settings::default()).unwrap();
    weaver.module_loaded(MODULE, fake.clone(), fake.clone());
    weaver.register_probes("batch", vec![sample_probe()]).unwrap();

    let registered = weaver.registered_probes().unwrap();
    let ticket = weaver
        .request_rewrite_async(&[MODULE], &registered)
        .unwrap();
    assert_eq!(ticket.wait().unwrap(), 1);
    assert_eq!(recompiler.submitted().len(), 1);
}

#[test]
fn module_load_matches_already_registered_probes() {
    let fake = fake_module();
    let recompiler = Arc::new(RecordingRecompiler::new());
    let weaver = Weaver::attach(recompiler.clone(), Settings::default()).unwrap();

    // Registration first, module load second: matching is offloaded.
    weaver.register_probes("batch", vec![sample_probe()]).unwrap();
    weaver.module_loaded(MODULE, fake.clone(), fake.clone());

    // Detach drains the worker queue before shutting it down.
    weaver.detach();
    let batches = recompiler.submitted();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0], vec![method()]);
}

#[test]
fn module_unload_discards_records() {
    let fake = fake_module();
    let recompiler = Arc::new(RecordingRecompiler::new());
    let weaver = Weaver::attach(recompiler, Settings::default()).unwrap();
    weaver.module_loaded(MODULE, fake.clone(), fake.clone());
    weaver.register_probes("batch", vec![sample_probe()]).unwrap();
    let registered = weaver.registered_probes().unwrap();
    weaver.request_rewrite(&[MODULE], &registered).unwrap();
    assert!(weaver.record(method()).unwrap().is_some());

    weaver.module_unloading(MODULE);

    assert!(weaver.record(method()).unwrap().is_none());
    assert_eq!(weaver.module_count().unwrap(), 0);

    // A rewrite pending against the unloaded module fails fast.
    let (control, replaced) = SharedControl::new(tiny_body(&[0x2A]));
    assert!(matches!(
        weaver.rewrite_requested(method(), Box::new(control)),
        Err(Error::LookupFailure(_))
    ));
    assert!(replaced.lock().unwrap().is_none());
}

#[test]
fn concurrent_controls_are_refused() {
    let fake = fake_module();
    let recompiler = Arc::new(RecordingRecompiler::new());
    let weaver = Weaver::attach(recompiler, Settings::default()).unwrap();
    weaver.module_loaded(MODULE, fake.clone(), fake.clone());
    weaver.register_probes("batch", vec![sample_probe()]).unwrap();
    let registered = weaver.registered_probes().unwrap();
    weaver.request_rewrite(&[MODULE], &registered).unwrap();

    // Hold a control on the record, then race a second rewrite callback.
    let record = weaver.record(method()).unwrap().unwrap();
    let (first, _first_replaced) = SharedControl::new(tiny_body(&[0x2A]));
    record.attach_control(Box::new(first)).unwrap();

    let (second, second_replaced) = SharedControl::new(tiny_body(&[0x2A]));
    assert!(matches!(
        weaver.rewrite_requested(method(), Box::new(second)),
        Err(Error::ControlBusy(_))
    ));
    assert!(second_replaced.lock().unwrap().is_none());
    assert_eq!(record.state().unwrap(), RewriteState::ControlAttached);
}

#[test]
fn compilation_event_resubmits_registered_methods() {
    let fake = fake_module();
    let recompiler = Arc::new(RecordingRecompiler::new());
    let weaver = Weaver::attach(recompiler.clone(), Settings::default()).unwrap();
    weaver.module_loaded(MODULE, fake.clone(), fake.clone());
    weaver.register_probes("batch", vec![sample_probe()]).unwrap();
    let registered = weaver.registered_probes().unwrap();
    weaver.request_rewrite(&[MODULE], &registered).unwrap();
    assert_eq!(recompiler.submitted().len(), 1);

    // Blocking-safe thread: submitted synchronously.
    weaver.method_compilation_started(method(), true);
    assert_eq!(recompiler.submitted().len(), 2);

    // Non-blocking thread: submitted through the worker.
    weaver.method_compilation_started(method(), false);
    weaver.detach();
    assert_eq!(recompiler.submitted().len(), 3);

    // Unknown methods are ignored.
    let unknown = MethodIdentifier {
        module: MODULE,
        method: Token::new(0x0600_0999),
    };
    weaver.method_compilation_started(unknown, true);
    assert_eq!(recompiler.submitted().len(), 3);
}

#[test]
fn rewrite_failure_returns_record_to_registered() {
    // A method body the importer rejects: the rewrite aborts, the record
    // recovers, and a later attempt can attach again.
    let fake = fake_module();
    let recompiler = Arc::new(RecordingRecompiler::new());
    let weaver = Weaver::attach(recompiler, Settings::default()).unwrap();
    weaver.module_loaded(MODULE, fake.clone(), fake.clone());
    weaver.register_probes("batch", vec![sample_probe()]).unwrap();
    let registered = weaver.registered_probes().unwrap();
    weaver.request_rewrite(&[MODULE], &registered).unwrap();

    let (control, replaced) = SharedControl::new(vec![0x01]);
    assert!(matches!(
        weaver.rewrite_requested(method(), Box::new(control)),
        Err(Error::ImportFailed(_))
    ));
    assert!(replaced.lock().unwrap().is_none());

    let record = weaver.record(method()).unwrap().unwrap();
    assert_eq!(record.state().unwrap(), RewriteState::Registered);

    // The next invocation succeeds.
    let (control, replaced) = SharedControl::new(tiny_body(&[0x2A]));
    weaver.rewrite_requested(method(), Box::new(control)).unwrap();
    assert!(replaced.lock().unwrap().is_some());
    assert_eq!(record.state().unwrap(), RewriteState::RewriteApplied);
}

#[test]
fn revert_transitions_back_to_control_attached() {
    let fake = fake_module();
    let recompiler = Arc::new(RecordingRecompiler::new());
    let weaver = Weaver::attach(recompiler, Settings::default()).unwrap();
    weaver.module_loaded(MODULE, fake.clone(), fake.clone());
    weaver.register_probes("batch", vec![sample_probe()]).unwrap();
    let registered = weaver.registered_probes().unwrap();
    weaver.request_rewrite(&[MODULE], &registered).unwrap();

    let (control, _replaced) = SharedControl::new(tiny_body(&[0x2A]));
    weaver.rewrite_requested(method(), Box::new(control)).unwrap();

    weaver.rewrite_reverted(method()).unwrap();
    let record = weaver.record(method()).unwrap().unwrap();
    assert_eq!(record.state().unwrap(), RewriteState::ControlAttached);

    // Reverting twice is an error.
    assert!(weaver.rewrite_reverted(method()).is_err());
}
