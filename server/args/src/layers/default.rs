use {
    crate::{declaration::OptionalConfig, stack::Layer},
    std::convert::Infallible,
};

#[derive(Debug, Clone, Default)]
pub struct DefaultLayer(OptionalConfig);

impl DefaultLayer {
    pub const fn new(default: OptionalConfig) -> Self {
        Self(default)
    }
}

impl Layer for DefaultLayer {
    type Err = Infallible;

    fn try_load(self) -> Result<OptionalConfig, Self::Err> {
        Ok(self.0)
    }
}
