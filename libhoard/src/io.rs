use crate::error::{HoardGenericError, HoardResult};
use std::io::prelude::*;
use std::str::FromStr;

pub(crate) trait BufReadExt: BufRead {
    fn is_at_eof(&mut self) -> HoardResult<bool> {
        Ok(self.fill_buf()?.is_empty())
    }

    /// read the bytes up to (and consuming) `delim`, parsing them as ascii
    fn read_ascii_until<T: FromStr>(&mut self, delim: u8) -> HoardResult<T>
    where
        HoardGenericError: From<T::Err>,
    {
        let mut buf = vec![];
        let n = self.read_until(delim, &mut buf)?;
        ensure!(n > 0 && buf[n - 1] == delim, "missing expected delimiter `{:#x}`", delim);
        std::str::from_utf8(&buf[..n - 1])?.parse().map_err(HoardGenericError::from)
    }
}

impl<R: BufRead + ?Sized> BufReadExt for R {
}
