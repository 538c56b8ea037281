pub mod classify_utils;
pub mod encoding_utils;
pub mod manifest_utils;
pub mod url_utils;
