use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// consolidated input and output of parameter snapshots
pub trait ParamIo: Serialize + DeserializeOwned {
    fn to_json<P: AsRef<Path>>(&self, file_path: P) -> anyhow::Result<()> {
        let mut writer = BufWriter::new(File::create(file_path.as_ref())?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    fn from_json<P: AsRef<Path>>(file_path: P) -> anyhow::Result<Self> {
        let reader = BufReader::new(File::open(file_path.as_ref())?);
        Ok(serde_json::from_reader(reader)?)
    }
}

impl ParamIo for crate::mixture::GmmNatural {}
impl ParamIo for crate::mixture::SmmState {}
impl ParamIo for crate::dirichlet::DirichletNatural {}
