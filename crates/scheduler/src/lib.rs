pub mod request;

pub use request::{
    Disposition, PixmapRequest, PixmapRequestFlags, RequestQueue, MAX_OBSERVER_ID,
    MAX_REQUEST_PIXELS,
};
