#![no_main]

use dbgate_approval::{
    is_valid_resource, parse_command_request, payload_is_unsafe, COMMAND_LINE_PREFIX,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Ok(request) = parse_command_request(&raw) else {
        return;
    };
    assert!(!request.keyword.is_empty());
    assert!(is_valid_resource(&request.resource));
    assert!(!request.payload.is_empty());
    assert!(request.command_line().starts_with(COMMAND_LINE_PREFIX));
    if payload_is_unsafe(&request.payload) {
        assert!(request.payload.to_ascii_uppercase().contains("DROP"));
    }
});
