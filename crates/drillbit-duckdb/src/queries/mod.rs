pub mod conversion;
pub mod detail;
pub mod entities;
pub mod report;
