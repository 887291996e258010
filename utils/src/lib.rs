pub mod tensor;
pub mod values;

pub use tensor::{argmax, Int, IntTensor};
