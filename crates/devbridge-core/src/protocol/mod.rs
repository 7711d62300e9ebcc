//! The JSON envelope protocol spoken over the bridge WebSocket.
//!
//! ```text
//! Client → Bridge:  {"type":"terminal","deviceId":"…","payload":{"action":"create",…},"requestId":"r1"}
//! Bridge → Client:  {"requestId":"r1","success":true,"data":{…}}              (direct reply)
//! Bridge → All:     {"type":"terminal:output","data":{…}}                     (broadcast)
//! ```

pub mod envelope;
