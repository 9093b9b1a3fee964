//! Function ARNs: `arn:aws:lambda:<region>:000000000000:function:<name>`.

/// Pseudo account every emulated function belongs to.
pub const ACCOUNT_ID: &str = "000000000000";

pub fn function_arn(region: &str, name: &str) -> String {
    format!("arn:aws:lambda:{region}:{ACCOUNT_ID}:function:{name}")
}

/// Extract the function name from an ARN issued for `region`.
///
/// Returns `None` if any fixed segment, the region or the account differs,
/// or if the ARN is qualified or truncated.
pub fn parse_function_arn<'a>(arn: &'a str, region: &str) -> Option<&'a str> {
    let parts: Vec<&str> = arn.split(':').collect();
    match parts.as_slice() {
        ["arn", "aws", "lambda", r, account, "function", name]
            if *r == region && *account == ACCOUNT_ID && !name.is_empty() =>
        {
            Some(*name)
        }
        _ => None,
    }
}
