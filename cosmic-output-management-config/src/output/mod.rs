/// Output configurations remembered across sessions
pub mod comp;
