pub mod leave_balance;
pub mod leave_request;
pub mod leave_type;

#[cfg(test)]
pub(crate) mod test_support;
