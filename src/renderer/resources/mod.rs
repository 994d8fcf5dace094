/// "Resources" refers to objects created by the user and handed to the
/// contexts, such as compiled shaders.

pub mod shader;
