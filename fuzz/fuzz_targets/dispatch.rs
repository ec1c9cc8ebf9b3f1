#![no_main]

use libfuzzer_sys::fuzz_target;
use lineprobe::prelude::*;

fuzz_target!(|data: &[u8]| {
    let dispatcher = Dispatcher::with_rewriter(ExclusionSet::new(), ProbeConfig::default());
    let request = LoadRequest {
        loader: Some(LoaderId(1)),
        unit_name: Some("fuzz/Unit"),
        being_redefined: false,
        bytes: data,
    };
    if let Some(rewritten) = dispatcher.on_load(&request) {
        // whatever the rewriter emits must parse again
        assert!(ClassFile::parse(&rewritten).is_ok());
    }
});
