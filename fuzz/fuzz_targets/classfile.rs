#![no_main]

use libfuzzer_sys::fuzz_target;
use hotpatch::ClassBinary;

fuzz_target!(|data: &[u8]| {
    if let Ok(class) = ClassBinary::parse(data) {
        if let Ok(bytes) = class.to_bytes() {
            assert_eq!(bytes, data);
        }
        for index in 0..class.methods.len() {
            let _ = class.decode_method(index);
        }
    }
});
