use glam::{Quat, Vec2, Vec3};

use crate::net::NetworkId;

use super::buffer::{BufferReader, BufferWriter, CodecError};

impl BufferWriter {
    pub fn write_vec2(&mut self, value: Vec2) -> Result<(), CodecError> {
        self.write_f32(value.x)?;
        self.write_f32(value.y)
    }

    pub fn write_vec3(&mut self, value: Vec3) -> Result<(), CodecError> {
        self.write_f32(value.x)?;
        self.write_f32(value.y)?;
        self.write_f32(value.z)
    }

    /// Orientation as raw quaternion components, x y z w.
    pub fn write_quat(&mut self, value: Quat) -> Result<(), CodecError> {
        self.write_f32(value.x)?;
        self.write_f32(value.y)?;
        self.write_f32(value.z)?;
        self.write_f32(value.w)
    }

    pub fn write_network_id(&mut self, id: NetworkId) -> Result<(), CodecError> {
        self.write_u16(id.raw())
    }
}

impl BufferReader<'_> {
    pub fn read_vec2(&mut self) -> Result<Vec2, CodecError> {
        Ok(Vec2::new(self.read_f32()?, self.read_f32()?))
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, CodecError> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_quat(&mut self) -> Result<Quat, CodecError> {
        Ok(Quat::from_xyzw(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }

    pub fn read_network_id(&mut self) -> Result<NetworkId, CodecError> {
        Ok(NetworkId::from_raw(self.read_u16()?))
    }
}
