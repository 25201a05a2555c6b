use std::{
    io,
    path::Path,
};

use crate::{
    config::WatchConfig,
    error::{Error, Result},
    event::ChangeEvent,
    state::Control,
};


pub(crate) const MIN_BUFFER_SIZE: usize = 1;


#[derive(Clone, Debug)]
pub(crate) struct Waker;

impl Waker {
    pub(crate) fn wake(&self) -> io::Result<()> {
        Ok(())
    }
}


/// Fails every watch at setup
#[derive(Debug)]
pub(crate) struct Backend;

impl Backend {
    pub(crate) fn open(root: &Path, _: &WatchConfig) -> Result<Self> {
        Err(Error::setup(root, io::Error::new(
            io::ErrorKind::Unsupported,
            "directory watching is not supported on this platform",
        )))
    }

    pub(crate) fn waker(&self) -> Waker {
        Waker
    }

    pub(crate) fn run(&mut self, _: &Control, _: &mut dyn FnMut(ChangeEvent))
        -> Result<()>
    {
        Ok(())
    }
}
