// Result Delivery Module
//
// Eager (callback driven) and lazy (cursor) consumption of result sets.

pub mod callback;
pub mod cursor;
pub mod deliverer;

pub use callback::{CollectRows, ResultContext, RowCallback};
pub use cursor::{CursorRows, CursorStatus, ResultCursor};
pub use deliverer::ResultDeliverer;
