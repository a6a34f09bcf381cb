//! Little-endian byte encoding used for every collective payload.
//!
//! Collectives move plain byte buffers; the matrix layer packs triplets and
//! CSR stripes through [`WireWriter`] and unpacks them with [`WireReader`].

use crate::core::traits::Scalar;
use crate::error::SpError;

#[derive(Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self { buf: Vec::with_capacity(bytes) }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_usize(&mut self, v: usize) {
        self.put_u64(v as u64);
    }

    pub fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_scalar<T: Scalar>(&mut self, v: T) {
        self.put_f64(v.real());
        if T::IS_COMPLEX {
            self.put_f64(v.imag());
        }
    }

    pub fn put_usizes(&mut self, vs: &[usize]) {
        self.put_usize(vs.len());
        for &v in vs {
            self.put_usize(v);
        }
    }

    pub fn put_scalars<T: Scalar>(&mut self, vs: &[T]) {
        self.put_usize(vs.len());
        for &v in vs {
            self.put_scalar(v);
        }
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_usize(s.len());
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SpError> {
        if self.pos + n > self.buf.len() {
            return Err(SpError::Io(format!(
                "truncated message: wanted {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.buf.len()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8, SpError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u64(&mut self) -> Result<u64, SpError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn get_usize(&mut self) -> Result<usize, SpError> {
        Ok(self.get_u64()? as usize)
    }

    pub fn get_f64(&mut self) -> Result<f64, SpError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(f64::from_le_bytes(arr))
    }

    pub fn get_scalar<T: Scalar>(&mut self) -> Result<T, SpError> {
        let re = self.get_f64()?;
        if T::IS_COMPLEX {
            let im = self.get_f64()?;
            Ok(T::from_parts(re, im))
        } else {
            Ok(T::from_real(re))
        }
    }

    pub fn get_string(&mut self) -> Result<String, SpError> {
        let n = self.get_usize()?;
        Ok(String::from_utf8_lossy(self.take(n)?).into_owned())
    }

    pub fn get_usizes(&mut self) -> Result<Vec<usize>, SpError> {
        let n = self.get_usize()?;
        (0..n).map(|_| self.get_usize()).collect()
    }

    pub fn get_scalars<T: Scalar>(&mut self) -> Result<Vec<T>, SpError> {
        let n = self.get_usize()?;
        (0..n).map(|_| self.get_scalar()).collect()
    }
}
