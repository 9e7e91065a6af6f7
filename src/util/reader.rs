use std::{
    io,
    io::{Read, Seek, SeekFrom, Write},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

#[inline]
pub fn skip_bytes<const N: usize, R>(reader: &mut R) -> io::Result<()>
where R: Read + Seek + ?Sized {
    reader.seek(SeekFrom::Current(N as i64))?;
    Ok(())
}

pub trait FromReader: Sized {
    const STATIC_SIZE: usize;

    fn from_reader<R>(reader: &mut R, e: Endian) -> io::Result<Self>
    where R: Read + Seek + ?Sized;
}

macro_rules! impl_from_reader {
    ($($t:ty),*) => {
        $(
            impl FromReader for $t {
                const STATIC_SIZE: usize = std::mem::size_of::<Self>();

                #[inline]
                fn from_reader<R>(reader: &mut R, e: Endian) -> io::Result<Self>
                where R: Read + Seek + ?Sized {
                    let mut buf = [0u8; Self::STATIC_SIZE];
                    reader.read_exact(&mut buf)?;
                    Ok(match e {
                        Endian::Big => Self::from_be_bytes(buf),
                        Endian::Little => Self::from_le_bytes(buf),
                    })
                }
            }
        )*
    };
}

impl_from_reader!(u8, u16, u32, i8, i16, i32);

impl<const N: usize> FromReader for [u32; N] {
    const STATIC_SIZE: usize = N * u32::STATIC_SIZE;

    #[inline]
    fn from_reader<R>(reader: &mut R, e: Endian) -> io::Result<Self>
    where R: Read + Seek + ?Sized {
        let mut buf = [0u32; N];
        for value in buf.iter_mut() {
            *value = u32::from_reader(reader, e)?;
        }
        Ok(buf)
    }
}

pub trait ToWriter: Sized {
    fn to_writer<W>(&self, writer: &mut W, e: Endian) -> io::Result<()>
    where W: Write + ?Sized;

    fn write_size(&self) -> usize;
}

macro_rules! impl_to_writer {
    ($($t:ty),*) => {
        $(
            impl ToWriter for $t {
                fn to_writer<W>(&self, writer: &mut W, e: Endian) -> io::Result<()>
                where W: Write + ?Sized {
                    writer.write_all(&match e {
                        Endian::Big => self.to_be_bytes(),
                        Endian::Little => self.to_le_bytes(),
                    })
                }

                fn write_size(&self) -> usize { std::mem::size_of::<Self>() }
            }
        )*
    };
}

impl_to_writer!(u8, u16, u32, i8, i16, i32);

impl<const N: usize> ToWriter for [u32; N] {
    fn to_writer<W>(&self, writer: &mut W, e: Endian) -> io::Result<()>
    where W: Write + ?Sized {
        for &value in self {
            value.to_writer(writer, e)?;
        }
        Ok(())
    }

    fn write_size(&self) -> usize { N * u32::STATIC_SIZE }
}
