//! Process-level bootstrap against a simulated host runtime.
//!
//! `premain` publishes process wide state, so everything runs in one test.

use std::sync::{Arc, Mutex};

use lineprobe::{
    isolation::{NativeEntry, NativeMethod},
    prelude::*,
    recorder,
};

#[derive(Default)]
struct SimulatedHost {
    defined: Mutex<Vec<String>>,
    natives: Mutex<Vec<NativeMethod>>,
    transformers: Mutex<Vec<Arc<dyn ClassFileTransformer>>>,
}

impl ClassDefiner for SimulatedHost {
    fn define_isolated(&self, name: &str, bytes: &[u8]) -> Result<()> {
        ClassFile::parse(bytes)?;
        self.defined.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn bind_natives(&self, _: &str, methods: &[NativeMethod]) -> Result<()> {
        self.natives.lock().unwrap().extend_from_slice(methods);
        Ok(())
    }
}

impl HostInstrumentation for SimulatedHost {
    fn add_transformer(&self, transformer: Arc<dyn ClassFileTransformer>) -> Result<()> {
        self.transformers.lock().unwrap().push(transformer);
        Ok(())
    }
}

impl SimulatedHost {
    fn load(&self, loader: Option<u64>, name: &str, bytes: &[u8]) -> Vec<u8> {
        let mut current = bytes.to_vec();
        for transformer in self.transformers.lock().unwrap().iter() {
            if let Some(replaced) =
                transformer.transform(loader.map(LoaderId), Some(name), false, &current)
            {
                current = replaced;
            }
        }
        current
    }

    /// Invoke the bound `registerHit(String, int)` the way a probe would.
    fn fire(&self, unit: &str, line: u32) {
        for native in self.natives.lock().unwrap().iter() {
            if let NativeEntry::Untimed(entry) = native.entry {
                entry(unit, line);
            }
        }
    }
}

fn app_class() -> Result<Vec<u8>> {
    ClassBuilder::new("app/Main")
        .method(
            MethodBuilder::new("main", "([Ljava/lang/String;)V")
                .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
                .body(|body| {
                    body.line(3);
                    body.op("nop")?;
                    body.line(4);
                    body.op("return")
                }),
        )
        .to_bytes()
}

#[test]
fn premain_installs_everything_once() -> Result<()> {
    // hits before the agent runs have nowhere to go
    recorder::register_hit("app/Early", 1);
    assert_eq!(recorder::orphaned_hits(), 1);

    let host = SimulatedHost::default();
    let agent = Agent::premain(Some("sink=memory,exclude=app/generated/"), &host)?;

    assert_eq!(*host.defined.lock().unwrap(), [RECORDER_CLASS]);
    assert_eq!(host.natives.lock().unwrap().len(), 1);
    assert_eq!(host.transformers.lock().unwrap().len(), 1);
    assert!(RecorderInstaller::global().is_installed());
    assert!(Arc::ptr_eq(
        recorder::global().expect("recorder published"),
        agent.recorder()
    ));

    // application classes are rewritten, excluded and recorder classes are not
    let main = app_class()?;
    assert_ne!(host.load(Some(1), "app/Main", &main), main);
    assert_eq!(host.load(Some(1), "app/generated/Proxy", &main), main);
    assert_eq!(host.load(None, "app/Boot", &main), main);
    let stub = lineprobe::isolation::recorder_stub_bytes(false)?;
    assert_eq!(host.load(Some(1), RECORDER_CLASS, &stub), stub);

    // probes reach the agent's recorder through the bound natives
    host.fire("app/Main", 3);
    host.fire("app/Main", 4);
    assert_eq!(agent.recorder().recorded(), 2);
    assert_eq!(recorder::orphaned_hits(), 1);

    // a second bootstrap in the same process is refused
    let again = Agent::premain(Some("sink=memory"), &SimulatedHost::default());
    assert!(matches!(again, Err(Error::Config(_))));

    let mut report = Vec::new();
    agent.shutdown(&mut report)?;
    let report = String::from_utf8(report).expect("utf-8 report");
    assert!(report.contains("Unit app/Main"));
    assert!(report.contains("line 3: 1 hits"));
    Ok(())
}
