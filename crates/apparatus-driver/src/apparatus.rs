//! 装置门面：两个转盘、灯光、声音与拉杆
//!
//! 命令分发层只通过 [`Apparatus`] 访问硬件。所有方法都可以从多个线程并发调用：
//! 转盘运动由各自的工作线程串行化，灯光与声音由互斥锁保护。

use crate::carousel::{Carousel, DoorSide, MotionCallback, MotionTicket};
use crate::config::ApparatusConfig;
use crate::error::DriverError;
use crate::lever::Lever;
use apparatus_hw::{ApparatusHardware, LightPanel, SoundPlayer};
use apparatus_protocol::{COMPARTMENT_COUNT, CarouselId, Color, LeverInput};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 清空人类侧时依次经过的格号
const EMPTY_HUMAN_STOPS: [u8; 5] = [0, 4, 8, 12, 16];

pub struct Apparatus {
    config: Arc<ApparatusConfig>,
    carousels: [Carousel; 2],
    lights: Mutex<Box<dyn LightPanel>>,
    sound: Mutex<Box<dyn SoundPlayer>>,
    lever: Lever,
}

impl Apparatus {
    pub fn new(config: Arc<ApparatusConfig>, hardware: ApparatusHardware) -> Result<Self, DriverError> {
        let ApparatusHardware {
            carousels: [hw1, hw2],
            lights,
            sound,
            lever_lock,
            lever_inputs,
        } = hardware;

        let carousels = [
            Carousel::new(CarouselId::First, hw1, &config.carousel1, &config.motion)?,
            Carousel::new(CarouselId::Second, hw2, &config.carousel2, &config.motion)?,
        ];
        let lever = Lever::new(&config.lever, lever_lock, lever_inputs);

        Ok(Self {
            config,
            carousels,
            lights: Mutex::new(lights),
            sound: Mutex::new(sound),
            lever,
        })
    }

    pub fn config(&self) -> &Arc<ApparatusConfig> {
        &self.config
    }

    pub fn carousel(&self, id: CarouselId) -> &Carousel {
        &self.carousels[id.index()]
    }

    pub fn lever(&self) -> &Lever {
        &self.lever
    }

    /// 复位全部硬件：灯光初始色、关门、两个转盘回到猴子侧 0 号格、锁拉杆、预加载声音
    pub fn init_hw(&self) -> Result<(), DriverError> {
        info!("Initialising lights");
        {
            let mut lights = self.lights.lock();
            lights.set_strip(Color::BLACK)?;
            lights.set_human_light(true, Some(Color::ELECTRIC_LIME))?;
            lights.set_test_light(false, None)?;
        }

        for carousel in &self.carousels {
            info!("Initialising {}", carousel.id());
            carousel.set_door(DoorSide::Human, false)?;
            carousel.set_door(DoorSide::Monkey, false)?;
            carousel.move_to(0, true, None)?;
        }
        for carousel in &self.carousels {
            carousel.wait_idle(None, false);
        }

        info!("Initialising lever");
        self.lever.set_open(false)?;

        if self.config.sound.precache {
            self.precache_sounds();
        }
        Ok(())
    }

    fn precache_sounds(&self) {
        let dir = &self.config.sound.sounds_path;
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Skipping sound precache, cannot read {}: {}", dir.display(), e);
                return;
            },
        };
        let mut sound = self.sound.lock();
        for path in entries.flatten().map(|entry| entry.path()).filter(|p| p.is_file()) {
            if let Err(e) = sound.play(&path, 0) {
                warn!("Failed to precache {}: {}", path.display(), e);
            }
        }
    }

    /// 自检：每个转盘经过全部格号，每扇门开关一次，灯光循环一遍，拉杆锁开关一次，最后复位
    pub fn hw_self_test(&self) -> Result<(), DriverError> {
        let dwell = self.config.motion.deploy_dwell();
        info!("Hardware self test started");

        for carousel in &self.carousels {
            for compartment in 0..COMPARTMENT_COUNT {
                carousel.move_to(compartment, false, None)?;
            }
        }
        for carousel in &self.carousels {
            carousel.wait_idle(None, false);
            for side in [DoorSide::Monkey, DoorSide::Human] {
                carousel.set_door(side, true)?;
                thread::sleep(dwell);
                carousel.set_door(side, false)?;
            }
        }

        {
            let mut lights = self.lights.lock();
            for &(name, color) in Color::PALETTE {
                debug!("self test color {}", name);
                lights.set_strip(color)?;
            }
            lights.set_test_light(true, None)?;
            lights.set_test_light(false, None)?;
        }

        self.lever.set_open(true)?;
        thread::sleep(dwell);
        self.lever.set_open(false)?;

        info!("Hardware self test finished");
        self.init_hw()
    }

    /// 播放声音（非阻塞）；`file` 相对于声音目录，缺省为配置的默认文件
    pub fn play_sound(&self, file: Option<&str>, volume: u8) -> Result<(), DriverError> {
        let file = file.unwrap_or(&self.config.sound.default_file);
        let path: PathBuf = self.config.sound.sounds_path.join(file);
        debug!("Playing {} at volume {}", path.display(), volume);
        self.sound.lock().play(&path, volume)?;
        Ok(())
    }

    /// 把两个转盘所有格子中的物品倒向人类侧
    pub fn empty_human(&self) -> Result<(), DriverError> {
        let dwell = self.config.motion.empty_human_dwell();
        for carousel in &self.carousels {
            carousel.set_door(DoorSide::Human, true)?;
        }
        thread::sleep(dwell);

        for compartment in EMPTY_HUMAN_STOPS {
            for carousel in &self.carousels {
                carousel.move_to(compartment, false, None)?;
            }
            for carousel in &self.carousels {
                carousel.wait_idle(None, false);
            }
        }

        thread::sleep(dwell);
        for carousel in self.carousels.iter().rev() {
            carousel.set_door(DoorSide::Human, false)?;
        }
        Ok(())
    }

    pub fn move_to(
        &self,
        id: CarouselId,
        compartment: u8,
        monkey: bool,
        on_complete: Option<MotionCallback>,
    ) -> Result<MotionTicket, DriverError> {
        self.carousel(id).move_to(compartment, monkey, on_complete)
    }

    pub fn deploy(
        &self,
        id: CarouselId,
        compartment: u8,
        monkey: bool,
        on_complete: Option<MotionCallback>,
    ) -> Result<MotionTicket, DriverError> {
        self.carousel(id).deploy(compartment, monkey, on_complete)
    }

    /// 等待转盘空闲；超时返回 `false`
    pub fn move_to_wait(&self, id: CarouselId, timeout: Option<Duration>, spinlock: bool) -> bool {
        self.carousel(id).wait_idle(timeout, spinlock)
    }

    pub fn deploy_wait(&self, id: CarouselId, timeout: Option<Duration>, spinlock: bool) -> bool {
        self.carousel(id).wait_idle(timeout, spinlock)
    }

    pub fn set_test_light(&self, on: bool, color: Option<Color>) -> Result<(), DriverError> {
        self.lights.lock().set_test_light(on, color)?;
        Ok(())
    }

    pub fn set_human_light(&self, on: bool, color: Option<Color>) -> Result<(), DriverError> {
        self.lights.lock().set_human_light(on, color)?;
        Ok(())
    }

    pub fn set_light(&self, color: Color) -> Result<(), DriverError> {
        self.lights.lock().set_strip(color)?;
        Ok(())
    }

    pub fn set_lever_open(&self, open: bool) -> Result<(), DriverError> {
        self.lever.set_open(open)
    }

    pub fn wait_lever_state(
        &self,
        input: LeverInput,
        state: bool,
        timeout: Option<Duration>,
        spinlock: bool,
    ) -> Result<bool, DriverError> {
        self.lever.wait_state(input, state, timeout, spinlock)
    }

    /// 停止全部电机：丢弃排队运动、断开步进电机、所有舵机断电
    pub fn motors_off(&self) -> Result<(), DriverError> {
        for carousel in &self.carousels {
            carousel.motors_off()?;
        }
        self.lever.release()?;
        Ok(())
    }
}
