use std_alloc::string::String;

use crate::msg::Msg;

pub(crate) fn msg_summary(msg: &Msg) -> String {
  use core::fmt::Write;

  let mut buf = String::new();
  write!(buf,
         "{:?} {} /{} with {} byte payload",
         msg.ty,
         String::from_iter(msg.code.to_human()),
         msg.path.trim_start_matches('/'),
         msg.payload.len()).ok();
  buf
}
