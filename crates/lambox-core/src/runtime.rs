//! Runtime tags accepted for new functions.
//!
//! Each tag names a `lambci/lambda` image; see
//! <https://github.com/lambci/docker-lambda#docker-tags>.

pub const SUPPORTED_RUNTIMES: &[&str] = &[
    "nodejs4.3",
    "nodejs6.10",
    "nodejs8.10",
    "nodejs10.x",
    "nodejs12.x",
    "python2.7",
    "python3.6",
    "python3.7",
    "python3.8",
    "ruby2.5",
    "ruby2.7",
    "java8",
    "java11",
    "go1.x",
    "dotnetcore2.0",
    "dotnetcore2.1",
    "dotnetcore3.1",
];

pub fn is_supported(runtime: &str) -> bool {
    SUPPORTED_RUNTIMES.contains(&runtime)
}
