#[path = "property/consistency.rs"]
mod consistency;
