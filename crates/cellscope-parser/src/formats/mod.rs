mod common;
mod delimited;
mod json;
mod xlsx;
mod xml;

pub use delimited::DelimitedParser;
pub use json::JsonParser;
pub use xlsx::XlsxParser;
pub use xml::XmlParser;
