#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

use hazelcast_wire::protocol::{builtin, exception, ClientMessageCodec};
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let mut codec = ClientMessageCodec::new().max_frame_size(1 << 20);
    let mut buf = BytesMut::from(data);

    loop {
        match codec.decode(&mut buf) {
            Ok(Some(Ok(msg))) => {
                let _ = msg.message_type();
                let _ = msg.correlation_id();
                let _ = msg.partition_id();
                let _ = msg.is_event();
                let _ = msg.wire_size();
                let _ = exception::decode_exception(&msg);

                let mut iter = msg.frame_iter();
                let _ = iter.next_frame();
                let _ = builtin::decode_list(&mut iter, builtin::decode_string);
                let _ = iter.fast_forward_to_end_frame();
            }
            Ok(Some(Err(_))) => continue,
            Ok(None) => break,
            Err(_) => break,
        }
    }
});
