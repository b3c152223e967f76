//! OpenGL presentation.
//!
//! The guest frame reaches the screen as two textures: the 400x240 index buffer as `R8UI` and
//! the 32x1 palette as `RGB32F`. A fragment shader resolves each pixel through the palette, so
//! the CPU never touches RGB data.

use std::ffi::{CStr, c_void};
use std::ptr;

use gl::types::{GLenum, GLint, GLsizei, GLuint};
use sdl2::VideoSubsystem;
use sdl2::video::{FullscreenType, GLContext, GLProfile, SwapInterval, Window};
use wandhost_core::abi::{COLOR_COUNT, PIXEL_BUFFER_H, PIXEL_BUFFER_W};
use wandhost_core::bridge::{PaletteView, PixelView};
use wandhost_core::video::{RenderBackend, RenderError};

const VERTEX_SHADER: &CStr = c"#version 330 core

layout(location = 0) in vec2 pos;
layout(location = 1) in vec2 uv;

out vec2 uv_interpolated;

void main()
{
    uv_interpolated = uv;
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

const FRAGMENT_SHADER: &CStr = c"#version 330 core

uniform usampler2D pixel_sampler;
uniform sampler2D palette_sampler;

in vec2 uv_interpolated;

out vec4 fragment_color;

void main()
{
    uint index = texture(pixel_sampler, uv_interpolated).r;
    vec3 rgb = vec3(0.0);
    if (index < 32u) {
        rgb = texelFetch(palette_sampler, ivec2(int(index), 0), 0).rgb;
    }
    fragment_color = vec4(rgb, 1.0);
}
";

/// Texture unit per sampler uniform.
const SAMPLERS: [(&str, &CStr, GLint); 2] = [
    ("pixel_sampler", c"pixel_sampler", 0),
    ("palette_sampler", c"palette_sampler", 1),
];

/// Full-screen quad as `x, y, u, v`, drawn as a triangle fan. `v = 0` is the bottom row,
/// which is where the guest keeps pixel row 0.
#[rustfmt::skip]
const QUAD: [f32; 16] = [
    -1.0, -1.0, 0.0, 0.0,
    -1.0,  1.0, 0.0, 1.0,
     1.0,  1.0, 1.0, 1.0,
     1.0, -1.0, 1.0, 0.0,
];

/// Largest viewport with the guest's aspect ratio that fits `drawable`, centered.
/// Returns `(x, y, width, height)`.
pub fn letterbox(drawable: (u32, u32)) -> (i32, i32, i32, i32) {
    let (w, h) = drawable;
    let scale = f64::min(
        f64::from(w) / PIXEL_BUFFER_W as f64,
        f64::from(h) / PIXEL_BUFFER_H as f64,
    );
    let vw = ((PIXEL_BUFFER_W as f64 * scale).round() as u32).min(w);
    let vh = ((PIXEL_BUFFER_H as f64 * scale).round() as u32).min(h);
    (
        ((w - vw) / 2) as i32,
        ((h - vh) / 2) as i32,
        vw as i32,
        vh as i32,
    )
}

unsafe fn info_log(
    object: GLuint,
    get_iv: unsafe fn(GLuint, GLenum, *mut GLint),
    get_log: unsafe fn(GLuint, GLsizei, *mut GLsizei, *mut gl::types::GLchar),
) -> String {
    let mut len: GLint = 0;
    unsafe { get_iv(object, gl::INFO_LOG_LENGTH, &mut len) };
    let mut buf = vec![0u8; len.max(1) as usize];
    let mut written: GLsizei = 0;
    unsafe { get_log(object, len, &mut written, buf.as_mut_ptr().cast()) };
    buf.truncate(written.max(0) as usize);
    String::from_utf8_lossy(&buf).trim_end().to_owned()
}

unsafe fn compile(kind: GLenum, stage: &'static str, source: &CStr) -> Result<GLuint, RenderError> {
    unsafe {
        let shader = gl::CreateShader(kind);
        gl::ShaderSource(shader, 1, &source.as_ptr(), ptr::null());
        gl::CompileShader(shader);

        let mut ok: GLint = 0;
        gl::GetShaderiv(shader, gl::COMPILE_STATUS, &mut ok);
        if ok == 0 {
            let log = info_log(shader, gl::GetShaderiv, gl::GetShaderInfoLog);
            gl::DeleteShader(shader);
            return Err(RenderError::ShaderCompile { stage, log });
        }
        Ok(shader)
    }
}

unsafe fn link(vertex: GLuint, fragment: GLuint) -> Result<GLuint, RenderError> {
    unsafe {
        let program = gl::CreateProgram();
        gl::AttachShader(program, vertex);
        gl::AttachShader(program, fragment);
        gl::LinkProgram(program);
        gl::DetachShader(program, vertex);
        gl::DetachShader(program, fragment);

        let mut ok: GLint = 0;
        gl::GetProgramiv(program, gl::LINK_STATUS, &mut ok);
        if ok == 0 {
            let log = info_log(program, gl::GetProgramiv, gl::GetProgramInfoLog);
            gl::DeleteProgram(program);
            return Err(RenderError::ProgramLink(log));
        }
        Ok(program)
    }
}

unsafe fn check_upload(what: &str) -> Result<(), RenderError> {
    let err = unsafe { gl::GetError() };
    if err == gl::NO_ERROR {
        Ok(())
    } else {
        Err(RenderError::Upload(format!("{what}: GL error 0x{err:04X}")))
    }
}

/// Palette lookup on the GPU. Needs a current GL 3.3 core context.
pub struct GlRenderer {
    program: GLuint,
    vao: GLuint,
    vbo: GLuint,
    sampler: GLuint,
    pixel_texture: GLuint,
    palette_texture: GLuint,
    drawable: (u32, u32),
}

impl GlRenderer {
    pub fn new(drawable: (u32, u32)) -> Result<Self, RenderError> {
        unsafe {
            let vertex = compile(gl::VERTEX_SHADER, "vertex", VERTEX_SHADER)?;
            let fragment = match compile(gl::FRAGMENT_SHADER, "fragment", FRAGMENT_SHADER) {
                Ok(fragment) => fragment,
                Err(err) => {
                    gl::DeleteShader(vertex);
                    return Err(err);
                }
            };
            let linked = link(vertex, fragment);
            gl::DeleteShader(vertex);
            gl::DeleteShader(fragment);
            let program = linked?;

            gl::UseProgram(program);
            for (name, cname, unit) in SAMPLERS {
                let location = gl::GetUniformLocation(program, cname.as_ptr());
                if location < 0 {
                    gl::DeleteProgram(program);
                    return Err(RenderError::MissingUniform(name));
                }
                gl::Uniform1i(location, unit);
            }

            let mut sampler = 0;
            gl::GenSamplers(1, &mut sampler);
            gl::SamplerParameteri(sampler, gl::TEXTURE_MAG_FILTER, gl::NEAREST as GLint);
            gl::SamplerParameteri(sampler, gl::TEXTURE_MIN_FILTER, gl::NEAREST as GLint);
            gl::SamplerParameteri(sampler, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as GLint);
            gl::SamplerParameteri(sampler, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as GLint);
            for (_, _, unit) in SAMPLERS {
                gl::BindSampler(unit as GLuint, sampler);
            }

            let mut textures = [0; 2];
            gl::GenTextures(2, textures.as_mut_ptr());
            let [pixel_texture, palette_texture] = textures;

            let mut vao = 0;
            let mut vbo = 0;
            gl::GenVertexArrays(1, &mut vao);
            gl::GenBuffers(1, &mut vbo);
            gl::BindVertexArray(vao);
            gl::BindBuffer(gl::ARRAY_BUFFER, vbo);
            gl::BufferData(
                gl::ARRAY_BUFFER,
                size_of_val(&QUAD) as isize,
                QUAD.as_ptr().cast(),
                gl::STATIC_DRAW,
            );
            let stride = (4 * size_of::<f32>()) as GLsizei;
            gl::VertexAttribPointer(0, 2, gl::FLOAT, gl::FALSE, stride, ptr::null());
            gl::EnableVertexAttribArray(0);
            gl::VertexAttribPointer(
                1,
                2,
                gl::FLOAT,
                gl::FALSE,
                stride,
                (2 * size_of::<f32>()) as *const c_void,
            );
            gl::EnableVertexAttribArray(1);
            gl::BindVertexArray(0);

            gl::Disable(gl::BLEND);
            gl::Disable(gl::CULL_FACE);
            gl::Disable(gl::DEPTH_TEST);
            gl::PixelStorei(gl::UNPACK_ALIGNMENT, 1);

            check_upload("renderer setup")?;

            Ok(Self {
                program,
                vao,
                vbo,
                sampler,
                pixel_texture,
                palette_texture,
                drawable,
            })
        }
    }

    /// Window size in pixels, used for the letterboxed viewport.
    pub fn set_drawable_size(&mut self, drawable: (u32, u32)) {
        self.drawable = drawable;
    }
}

impl RenderBackend for GlRenderer {
    fn upload_palette(&mut self, palette: PaletteView<'_>) -> Result<(), RenderError> {
        let floats = palette.to_floats();
        unsafe {
            gl::ActiveTexture(gl::TEXTURE1);
            gl::BindTexture(gl::TEXTURE_2D, self.palette_texture);
            gl::TexImage2D(
                gl::TEXTURE_2D,
                0,
                gl::RGB32F as GLint,
                COLOR_COUNT as GLsizei,
                1,
                0,
                gl::RGB,
                gl::FLOAT,
                floats.as_ptr().cast(),
            );
            check_upload("palette")
        }
    }

    fn upload_pixels(&mut self, pixels: PixelView<'_>) -> Result<(), RenderError> {
        unsafe {
            gl::ActiveTexture(gl::TEXTURE0);
            gl::BindTexture(gl::TEXTURE_2D, self.pixel_texture);
            gl::TexImage2D(
                gl::TEXTURE_2D,
                0,
                gl::R8UI as GLint,
                pixels.width() as GLsizei,
                pixels.height() as GLsizei,
                0,
                gl::RED_INTEGER,
                gl::UNSIGNED_BYTE,
                pixels.as_bytes().as_ptr().cast(),
            );
            check_upload("pixels")
        }
    }

    fn draw(&mut self) -> Result<(), RenderError> {
        let (w, h) = self.drawable;
        let (x, y, vw, vh) = letterbox(self.drawable);
        unsafe {
            gl::Viewport(0, 0, w as GLsizei, h as GLsizei);
            gl::ClearColor(0.0, 0.0, 0.0, 1.0);
            gl::Clear(gl::COLOR_BUFFER_BIT);

            gl::Viewport(x, y, vw, vh);
            gl::UseProgram(self.program);
            gl::BindVertexArray(self.vao);
            gl::DrawArrays(gl::TRIANGLE_FAN, 0, 4);
            gl::BindVertexArray(0);
        }
        Ok(())
    }
}

impl Drop for GlRenderer {
    fn drop(&mut self) {
        unsafe {
            gl::DeleteTextures(2, [self.pixel_texture, self.palette_texture].as_ptr());
            gl::DeleteSamplers(1, &self.sampler);
            gl::DeleteBuffers(1, &self.vbo);
            gl::DeleteVertexArrays(1, &self.vao);
            gl::DeleteProgram(self.program);
        }
    }
}

/// The window, its GL context and the renderer drawing into it.
pub struct Display {
    // Dropped first: GL objects go away while the context is still alive.
    pub renderer: GlRenderer,
    _context: GLContext,
    window: Window,
}

impl Display {
    pub fn new(video: &VideoSubsystem, title: &str, scale: u32, vsync: bool) -> Result<Self, RenderError> {
        let attr = video.gl_attr();
        attr.set_context_profile(GLProfile::Core);
        attr.set_context_version(3, 3);

        let window = video
            .window(
                title,
                PIXEL_BUFFER_W as u32 * scale,
                PIXEL_BUFFER_H as u32 * scale,
            )
            .opengl()
            .resizable()
            .position_centered()
            .build()
            .map_err(|err| RenderError::Context(err.to_string()))?;

        let context = window.gl_create_context().map_err(RenderError::Context)?;
        gl::load_with(|name| video.gl_get_proc_address(name) as *const c_void);

        let interval = if vsync {
            SwapInterval::VSync
        } else {
            SwapInterval::Immediate
        };
        if let Err(err) = video.gl_set_swap_interval(interval) {
            log::warn!("could not set swap interval (vsync {vsync}): {err}");
        }

        let renderer = GlRenderer::new(window.drawable_size())?;
        log::info!(
            "window {}x{} (scale {scale}), vsync {vsync}",
            PIXEL_BUFFER_W as u32 * scale,
            PIXEL_BUFFER_H as u32 * scale
        );

        Ok(Self {
            renderer,
            _context: context,
            window,
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Pick up window resizes before the next draw.
    pub fn sync_drawable_size(&mut self) {
        self.renderer.set_drawable_size(self.window.drawable_size());
    }

    pub fn swap(&self) {
        self.window.gl_swap_window();
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool) {
        let mode = if fullscreen {
            FullscreenType::Desktop
        } else {
            FullscreenType::Off
        };
        if let Err(err) = self.window.set_fullscreen(mode) {
            log::warn!("could not switch fullscreen to {fullscreen}: {err}");
        }
    }
}
