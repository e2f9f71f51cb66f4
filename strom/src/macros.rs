macro_rules! cfg_fs {
   ($($item:item)*) => {
       $(
            #[cfg(all(unix, feature = "fs"))]
            #[cfg_attr(docsrs, doc(cfg(all(unix, feature = "fs"))))]
            $item
        )*
    }
}

macro_rules! cfg_uring {
   ($($item:item)*) => {
       $(
            #[cfg(all(target_os = "linux", feature = "uring"))]
            #[cfg_attr(docsrs, doc(cfg(all(target_os = "linux", feature = "uring"))))]
            $item
        )*
    }
}

#[cfg(all(unix, feature = "fs"))]
macro_rules! syscall {
  ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
      #[allow(unused_unsafe)]
      let res = unsafe { libc::$fn($($arg, )*) };
      if res == -1 {
          Err(std::io::Error::last_os_error())
      } else {
          Ok(res)
      }
  }};
}
